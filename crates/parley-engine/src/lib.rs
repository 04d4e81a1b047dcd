pub mod compaction;
pub mod error;
pub mod normalizer;
pub mod rotation;
pub mod stream;
pub mod tokens;
pub mod truncate;
pub mod turn;

#[cfg(test)]
mod testing;

pub use compaction::{CompactionConfig, CompactionDecision, Compactor};
pub use error::EngineError;
pub use normalizer::TraceNormalizer;
pub use stream::{ChannelSink, EventSink, StreamOrchestrator, StreamOutcome, StreamRequest};
pub use turn::{TurnController, TurnOutcome, TurnRequest};
