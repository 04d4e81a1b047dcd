//! External session rotation.
//!
//! After a compaction the agent's own memory of the conversation is stale,
//! so the session is pointed at a fresh external id. The summary rides along
//! as pending context until enough new messages have accumulated.

use tracing::{info, instrument};

use parley_core::ids::{ExternalSessionId, SessionId};
use parley_core::session::ExternalSessionState;
use parley_store::{SessionStore, StoreError};

/// Pure rotation: new external id, summary pending, counter reset.
pub fn rotate(state: &ExternalSessionState, summary: impl Into<String>) -> ExternalSessionState {
    let next = ExternalSessionState {
        external_session_id: ExternalSessionId::new(),
        pending_summary: Some(summary.into()),
        messages_since_rotation: 0,
    };
    debug_assert_ne!(next.external_session_id, state.external_session_id);
    next
}

/// What to do with the pending summary for one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryInjection {
    /// Summary to prepend to the outbound text, if any.
    pub summary: Option<String>,
    /// Clear the pending summary once this turn has used it.
    pub clear: bool,
}

/// Decide whether the pending summary is injected, and whether this is the
/// last time. A summary is injected every turn and cleared on the turn where
/// the counter reaches `threshold`.
pub fn consume(state: &ExternalSessionState, threshold: u32) -> SummaryInjection {
    match state.pending_summary.as_deref().filter(|s| !s.is_empty()) {
        None => SummaryInjection {
            summary: None,
            clear: false,
        },
        Some(summary) => SummaryInjection {
            summary: Some(summary.to_owned()),
            clear: state.messages_since_rotation >= threshold,
        },
    }
}

/// Rotate the stored session and persist the result in one update.
#[instrument(skip(store, summary), fields(session_id = %session_id))]
pub fn rotate_session(
    store: &dyn SessionStore,
    session_id: &SessionId,
    summary: &str,
) -> Result<ExternalSessionState, StoreError> {
    let current = store.get_external_session_state(session_id)?;
    let next = rotate(&current, summary);
    store.rotate_external_session(session_id, &next)?;
    info!(
        old_external_session_id = %current.external_session_id,
        new_external_session_id = %next.external_session_id,
        "external session rotated"
    );
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::messages::NewMessage;
    use parley_store::{Database, SqliteStore};

    fn state(pending: Option<&str>, count: u32) -> ExternalSessionState {
        ExternalSessionState {
            external_session_id: ExternalSessionId::from_raw("ext_old"),
            pending_summary: pending.map(Into::into),
            messages_since_rotation: count,
        }
    }

    #[test]
    fn rotate_replaces_id_and_resets_counter() {
        let before = state(None, 17);
        let after = rotate(&before, "sum");
        assert_ne!(after.external_session_id, before.external_session_id);
        assert_eq!(after.pending_summary.as_deref(), Some("sum"));
        assert_eq!(after.messages_since_rotation, 0);
    }

    #[test]
    fn consume_injects_until_threshold_then_clears() {
        for count in 0..10 {
            let injection = consume(&state(Some("sum"), count), 10);
            assert_eq!(injection.summary.as_deref(), Some("sum"));
            assert!(!injection.clear, "cleared early at {count}");
        }
        let last = consume(&state(Some("sum"), 10), 10);
        assert_eq!(last.summary.as_deref(), Some("sum"));
        assert!(last.clear);
        assert!(consume(&state(Some("sum"), 25), 10).clear);
    }

    #[test]
    fn consume_without_summary_is_noop() {
        let none = consume(&state(None, 50), 10);
        assert_eq!(none.summary, None);
        assert!(!none.clear);
        assert_eq!(consume(&state(Some(""), 3), 10).summary, None);
    }

    #[test]
    fn rotate_session_persists_state() {
        let store = SqliteStore::new(Database::in_memory().unwrap());
        let session = store.create_session(None).unwrap();
        store
            .append_message(&session.id, NewMessage::user("hi", vec![]))
            .unwrap();

        let next = rotate_session(&store, &session.id, "summary text").unwrap();
        assert_ne!(next.external_session_id, session.external_session_id);
        assert_eq!(store.get_external_session_state(&session.id).unwrap(), next);
    }

    #[test]
    fn rotate_session_unknown_is_not_found() {
        let store = SqliteStore::new(Database::in_memory().unwrap());
        let err = rotate_session(&store, &SessionId::from_raw("sess_missing"), "s").unwrap_err();
        assert!(err.is_not_found());
    }
}
