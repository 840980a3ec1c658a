pub mod types;

pub use types::{Message, Session, SessionId, UserId};
