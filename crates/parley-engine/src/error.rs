use parley_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl EngineError {
    /// Store lookups that miss a session surface as `SessionNotFound`.
    pub fn from_store(err: StoreError, session_id: &str) -> Self {
        if err.is_not_found() {
            Self::SessionNotFound(session_id.to_owned())
        } else {
            Self::Store(err)
        }
    }
}
