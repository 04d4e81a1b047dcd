use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use parley_engine::CompactionConfig;
use parley_llm::{AgentGatewayConfig, SummarizerConfig};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ORIGINS: &str = "http://localhost:3000";
const DEFAULT_AGENT_ENDPOINT: &str = "http://localhost:8081/invoke";
const DEFAULT_AGENT_NAME: &str = "Main Agent";
const DEFAULT_SUMMARIZER_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_SUMMARIZER_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_TURN_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Everything the server needs, read from the environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub agent: AgentGatewayConfig,
    pub summarizer: SummarizerConfig,
    pub allowed_origins: Vec<String>,
    pub compaction: CompactionConfig,
    /// Upper bound on a whole chat turn, compaction included.
    pub turn_timeout: Duration,
    /// Outbound events buffered per turn before the agent stream waits.
    pub event_buffer: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());
        let compaction_defaults = CompactionConfig::default();

        Ok(Self {
            port: parse(&get, "PORT", DEFAULT_PORT)?,
            db_path: get("PARLEY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| parley_telemetry::data_dir().join("parley.db")),
            agent: AgentGatewayConfig {
                endpoint: string("AGENT_ENDPOINT", DEFAULT_AGENT_ENDPOINT),
                agent_id: string("AGENT_ID", ""),
                agent_alias: string("AGENT_ALIAS", ""),
                agent_name: string("AGENT_NAME", DEFAULT_AGENT_NAME),
            },
            summarizer: SummarizerConfig {
                endpoint: string("SUMMARIZER_ENDPOINT", DEFAULT_SUMMARIZER_ENDPOINT),
                model: string("SUMMARIZER_MODEL", DEFAULT_SUMMARIZER_MODEL),
                api_key: SecretString::from(string("SUMMARIZER_API_KEY", "")),
            },
            allowed_origins: string("ALLOWED_ORIGINS", DEFAULT_ORIGINS)
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_owned)
                .collect(),
            compaction: CompactionConfig {
                token_threshold: parse(&get, "COMPACTION_TOKEN_THRESHOLD", compaction_defaults.token_threshold)?,
                keep_recent: parse(&get, "COMPACTION_KEEP_RECENT", compaction_defaults.keep_recent)?,
                summary_consumption_threshold: parse(
                    &get,
                    "SUMMARY_CONSUMPTION_THRESHOLD",
                    compaction_defaults.summary_consumption_threshold,
                )?,
            },
            turn_timeout: Duration::from_secs(parse(&get, "TURN_TIMEOUT_SECS", DEFAULT_TURN_TIMEOUT_SECS)?),
            event_buffer: 64,
        })
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
