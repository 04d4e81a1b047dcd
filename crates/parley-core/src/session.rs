use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, ExternalSessionId, SessionId};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// A conversation. `id` is stable; `external_session_id` is what the agent
/// sees and changes on every rotation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub external_session_id: ExternalSessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_summary: Option<String>,
    pub messages_since_rotation: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    pub fn external_state(&self) -> ExternalSessionState {
        ExternalSessionState {
            external_session_id: self.external_session_id.clone(),
            pending_summary: self.pending_summary.clone(),
            messages_since_rotation: self.messages_since_rotation,
        }
    }
}

/// The rotation-relevant slice of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSessionState {
    pub external_session_id: ExternalSessionId,
    pub pending_summary: Option<String>,
    pub messages_since_rotation: u32,
}

/// Text already extracted from an uploaded file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub session_id: SessionId,
    pub filename: String,
    pub file_type: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub filename: String,
    #[serde(default)]
    pub file_type: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(pending: Option<&str>) -> Session {
        Session {
            id: SessionId::from_raw("sess_1"),
            title: DEFAULT_SESSION_TITLE.into(),
            external_session_id: ExternalSessionId::from_raw("ext_1"),
            pending_summary: pending.map(str::to_owned),
            messages_since_rotation: 3,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn external_state_copies_rotation_fields() {
        let state = session(Some("earlier")).external_state();
        assert_eq!(state.external_session_id.as_str(), "ext_1");
        assert_eq!(state.pending_summary.as_deref(), Some("earlier"));
        assert_eq!(state.messages_since_rotation, 3);
    }

    #[test]
    fn session_serializes_camel_case_without_empty_summary() {
        let v = serde_json::to_value(session(None)).unwrap();
        assert_eq!(v["externalSessionId"], "ext_1");
        assert_eq!(v["messagesSinceRotation"], 3);
        assert!(v.get("pendingSummary").is_none());
    }

    #[test]
    fn new_document_file_type_defaults_to_empty() {
        let doc: NewDocument =
            serde_json::from_value(json!({ "filename": "a.txt", "content": "x" })).unwrap();
        assert_eq!(doc.file_type, "");
    }
}
