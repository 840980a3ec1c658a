use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store identifiers arrive either as text (uuid) or as integers depending on
/// the table definition. Both are kept as opaque strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "RawId", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<RawId> for $name {
            fn from(raw: RawId) -> Self {
                Self(raw.into())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Unique identifier of a chat session row
    SessionId
);

opaque_id!(
    /// Identifier of the user owning a session
    UserId
);

/// A persisted conversation record, as read from the `chat_sessions` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Session {
    /// Creates an active session
    pub fn new(id: impl Into<SessionId>, user_id: impl Into<UserId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at,
            is_active: true,
        }
    }
}

/// A message row belonging to exactly one session. Content is opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: SessionId,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn new(id: impl Into<String>, session_id: impl Into<SessionId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation_is_active() {
        let session = Session::new("s1", "u1", Utc::now());
        assert_eq!(session.id.as_str(), "s1");
        assert_eq!(session.user_id.as_str(), "u1");
        assert!(session.is_active);
    }

    #[test]
    fn test_deserialize_store_row() {
        let json = r#"{
            "id": "6f1c2a4e-0000-4000-8000-000000000001",
            "user_id": "user-42",
            "created_at": "2026-02-15T10:30:00.123456+00:00",
            "is_active": true,
            "title": "ignored column"
        }"#;

        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.id.as_str(), "6f1c2a4e-0000-4000-8000-000000000001");
        assert_eq!(session.user_id.as_str(), "user-42");
        assert!(session.is_active);
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let json = r#"{"id": 17, "user_id": 3, "created_at": "2026-02-15T10:30:00Z"}"#;

        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, SessionId::new("17"));
        assert_eq!(session.user_id, UserId::new("3"));
        // Missing flag defaults to active
        assert!(session.is_active);
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&SessionId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_message_deserialization_without_content() {
        let json = r#"{"id": "m1", "session_id": "s1"}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.session_id.as_str(), "s1");
        assert!(message.content.is_empty());
    }
}
