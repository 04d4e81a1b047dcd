pub mod config;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use orchestrator::{ChatOrchestrator, TurnRejected};
pub use server::{build_router, start, AppState, ServerHandle};
