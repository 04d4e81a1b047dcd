use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(MessageId, "msg");
branded_id!(DocumentId, "doc");
branded_id!(TraceId, "trace");
// Identity presented to the external agent. Rotated independently of SessionId.
branded_id!(ExternalSessionId, "ext");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn message_id_has_prefix() {
        let id = MessageId::new();
        assert!(id.as_str().starts_with("msg_"), "got: {id}");
    }

    #[test]
    fn external_session_id_has_prefix() {
        let id = ExternalSessionId::new();
        assert!(id.as_str().starts_with("ext_"), "got: {id}");
    }

    #[test]
    fn trace_id_has_prefix() {
        let id = TraceId::new();
        assert!(id.as_str().starts_with("trace_"), "got: {id}");
    }

    #[test]
    fn external_ids_never_collide() {
        let ids: std::collections::HashSet<ExternalSessionId> =
            (0..1000).map(|_| ExternalSessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = DocumentId::from_raw("custom-id-123");
        assert_eq!(id.as_str(), "custom-id-123");
    }

    #[test]
    fn display_and_from_str_agree() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = MessageId::from_raw("msg_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"msg_1\"");
    }
}
