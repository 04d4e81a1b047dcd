pub mod agent;
pub mod sse;
pub mod summarizer;

pub mod mock;

pub use agent::{AgentGatewayConfig, HttpAgentRuntime};
pub use mock::{MockAgent, MockResponse, MockSummarizer};
pub use summarizer::{MessagesApiSummarizer, SummarizerConfig};
