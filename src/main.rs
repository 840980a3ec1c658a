use clap::Parser;
use sessionsweep::cli;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let filter_level = if verbose { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(filter_level.into()))
        .with_writer(std::io::stderr) // stdout carries results only
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();
}

fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;

            match e.kind() {
                ErrorKind::DisplayVersion | ErrorKind::DisplayHelp => {
                    e.print().ok();
                    std::process::exit(0);
                }
                _ => {
                    e.print().ok();
                    std::process::exit(2);
                }
            }
        }
    };

    init_logging(cli.verbose);
    tracing::debug!("Verbose mode enabled");
    tracing::debug!("Starting sessionsweep v{}", env!("CARGO_PKG_VERSION"));

    // One thread, one step at a time
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(cli::run(cli)) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
