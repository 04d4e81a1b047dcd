use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, MessageId, SessionId};
use crate::trace::Trace;

/// Prefix marking a system message that holds a compaction summary.
pub const SUMMARY_PREFIX: &str = "[Conversation Summary]\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Speaker label used when rendering a transcript.
    pub fn speaker(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "AI",
            Self::System => "System",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One stored turn entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_refs: Vec<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    pub created_at: String,
}

/// A message that has not been persisted yet.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub document_refs: Vec<DocumentId>,
    pub trace: Option<Trace>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>, document_refs: Vec<DocumentId>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            document_refs,
            trace: None,
        }
    }

    pub fn assistant(content: impl Into<String>, trace: Trace) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            document_refs: Vec::new(),
            trace: Some(trace),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            document_refs: Vec::new(),
            trace: None,
        }
    }

    /// System message carrying a compaction summary.
    pub fn summary(summary: &str) -> Self {
        Self::system(format!("{SUMMARY_PREFIX}{summary}"))
    }
}
