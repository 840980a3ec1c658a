//! Layered configuration loading
//!
//! Layers are applied in order, each overriding the previous one:
//! defaults, the JSON file, environment variables, CLI flags.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::schema::Config;
use crate::reconcile::PolicyError;

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
pub(crate) static CONFIG_TEST_ENV_LOCK: Mutex<()> = Mutex::new(());

const CONFIG_DIR: &str = ".sessionsweep";
const CONFIG_FILE: &str = "config.json";
const SECRET_FILE_MODE: u32 = 0o600;

const STORE_URL_VARS: &[&str] = &["SESSIONSWEEP_STORE_URL", "SUPABASE_URL"];
const API_KEY_VARS: &[&str] = &["SESSIONSWEEP_API_KEY", "SUPABASE_ANON_KEY"];
const LEDGER_PATH_VARS: &[&str] = &["SESSIONSWEEP_LEDGER_PATH"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {path:?} is not valid JSON: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid duplicate policy: {0}")]
    InvalidPolicy(#[from] PolicyError),
}

/// Builds the effective configuration
///
/// `cli_config_path` replaces `~/.sessionsweep/config.json`; a missing file
/// just means defaults.
pub fn load_config(cli_store_url: Option<String>, cli_config_path: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::default();

    match cli_config_path.or_else(get_config_path) {
        Some(path) => {
            if let Some(file_config) = read_config_file(&path)? {
                config = file_config;
            }
        }
        None => tracing::debug!("No home directory, skipping config file"),
    }

    config = apply_env_overrides(config);

    if let Some(url) = cli_store_url {
        tracing::debug!(store_url = %url, "Store URL taken from command line");
        config.store_url = Some(url);
    }

    config.policy().map_err(ConfigError::InvalidPolicy)?;

    let summary = config.get_safe_summary();
    tracing::debug!(
        store_url = ?summary.store_url,
        api_key_configured = summary.api_key_configured,
        sessions_table = %summary.sessions_table,
        messages_table = %summary.messages_table,
        ledger_path = ?summary.ledger_path,
        "Effective configuration"
    );

    Ok(config)
}

/// Reads the config file, or `None` when it is absent or not owner-only
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(config_path = %path.display(), "No config file, using defaults");
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("Cannot stat config file {:?}", path)),
    };

    // The file carries the store key
    let mode = metadata.permissions().mode() & 0o777;
    if mode != SECRET_FILE_MODE {
        tracing::error!(
            config_path = %path.display(),
            mode = %format!("{:o}", mode),
            "Ignoring config file, it must be readable by its owner only (0600)"
        );
        return Ok(None);
    }

    tracing::debug!(config_path = %path.display(), "Reading config file");
    let raw = fs::read_to_string(path).with_context(|| format!("Cannot read config file {:?}", path))?;
    let config = serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Some(config))
}

/// First non-blank value among `names`
fn env_value(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

fn apply_env_overrides(config: Config) -> Config {
    Config {
        store_url: env_value(STORE_URL_VARS).or(config.store_url),
        api_key: env_value(API_KEY_VARS).or(config.api_key),
        ledger_path: env_value(LEDGER_PATH_VARS)
            .map(PathBuf::from)
            .or(config.ledger_path),
        ..config
    }
}

/// Writes `config` as pretty JSON with owner-only permissions
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create directory {:?}", dir))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    let mut file = fs::File::create(path).with_context(|| format!("Cannot create {:?}", path))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Cannot write {:?}", path))?;
    fs::set_permissions(path, fs::Permissions::from_mode(SECRET_FILE_MODE))
        .with_context(|| format!("Cannot restrict permissions of {:?}", path))?;

    tracing::info!(config_path = %path.display(), "Saved configuration");
    Ok(())
}

/// `~/.sessionsweep/config.json`
pub fn get_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    fn clear_env() {
        for name in STORE_URL_VARS.iter().chain(API_KEY_VARS).chain(LEDGER_PATH_VARS) {
            unsafe {
                env::remove_var(name);
            }
        }
    }

    fn file_config() -> Config {
        Config {
            store_url: Some("https://file.supabase.co".to_string()),
            api_key: Some("file-key".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();

        let config = load_config(None, Some(temp_dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_saved_file_is_loaded_back() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let saved = Config {
            messages_table: "messages".to_string(),
            max_sessions_per_user: 5,
            ..file_config()
        };
        save_config(&saved, &path).unwrap();

        assert_eq!(load_config(None, Some(path)).unwrap(), saved);
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ store_url: ").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let err = load_config(None, Some(path)).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    fn load_with_policy(window_minutes: i64, max_sessions_per_user: usize) -> Result<Config> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let saved = Config {
            duplicate_window_minutes: window_minutes,
            max_sessions_per_user,
            ..file_config()
        };
        save_config(&saved, &path).unwrap();
        load_config(None, Some(path))
    }

    #[test]
    fn test_out_of_range_window_is_a_config_error() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();

        let err = load_with_policy(i64::MAX, 3).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_negative_window_is_a_config_error() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();

        let err = load_with_policy(-5, 3).unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
    }

    #[test]
    fn test_zero_cap_is_a_config_error() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();

        let err = load_with_policy(10, 0).unwrap_err();
        assert!(err.to_string().contains("max_sessions_per_user"));
    }

    #[test]
    fn test_zero_window_is_accepted() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();

        let config = load_with_policy(0, 1).unwrap();
        assert_eq!(config.duplicate_window_minutes, 0);
    }

    #[test]
    fn test_group_readable_file_is_ignored() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        save_config(&file_config(), &path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let config = load_config(None, Some(path)).unwrap();
        assert!(config.api_key.is_none());
        assert!(config.store_url.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        save_config(&file_config(), &path).unwrap();

        unsafe {
            env::set_var("SESSIONSWEEP_API_KEY", "env-key");
            env::set_var("SESSIONSWEEP_LEDGER_PATH", "/tmp/ledger.json");
        }

        let config = load_config(None, Some(path)).unwrap();
        assert_eq!(config.store_url.as_deref(), Some("https://file.supabase.co"));
        assert_eq!(config.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.ledger_path, Some(PathBuf::from("/tmp/ledger.json")));

        clear_env();
    }

    #[test]
    fn test_supabase_variables_are_fallbacks() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();

        unsafe {
            env::set_var("SUPABASE_URL", "https://fallback.supabase.co");
            env::set_var("SUPABASE_ANON_KEY", "anon");
            // Blank values do not count
            env::set_var("SESSIONSWEEP_STORE_URL", "  ");
        }

        let config = load_config(None, Some(temp_dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.store_url.as_deref(), Some("https://fallback.supabase.co"));
        assert_eq!(config.api_key.as_deref(), Some("anon"));

        clear_env();
    }

    #[test]
    fn test_cli_flag_wins_over_env_and_file() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        save_config(&file_config(), &path).unwrap();

        unsafe {
            env::set_var("SESSIONSWEEP_STORE_URL", "https://env.supabase.co");
        }

        let config = load_config(Some("https://cli.supabase.co".to_string()), Some(path)).unwrap();
        assert_eq!(config.store_url.as_deref(), Some("https://cli.supabase.co"));
        assert_eq!(config.api_key.as_deref(), Some("file-key"));

        clear_env();
    }

    #[test]
    fn test_saved_file_is_owner_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        save_config(&Config::default(), &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SECRET_FILE_MODE);
    }

    #[test]
    fn test_default_config_path() {
        let path = get_config_path().unwrap();
        assert!(path.ends_with(".sessionsweep/config.json"));
    }
}
