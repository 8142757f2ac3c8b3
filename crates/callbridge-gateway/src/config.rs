//! Gateway configuration: defaults → TOML file → `CALLBRIDGE__*` environment.

use std::path::Path;
use std::time::Duration;

use callbridge_core::ReasoningConfig;
use callbridge_voice::{RecognizerConfig, SessionConfig, SynthesisConfig};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

/// Session timings in milliseconds, as they appear in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub debounce_ms: u64,
    pub greeting_delay_ms: u64,
    pub frame_poll_ms: u64,
    pub queue_capacity: usize,
    pub reasoning_timeout_ms: u64,
    pub allow_test_input: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let d = SessionConfig::default();
        Self {
            debounce_ms: d.debounce.as_millis() as u64,
            greeting_delay_ms: d.greeting_delay.as_millis() as u64,
            frame_poll_ms: d.poll_interval.as_millis() as u64,
            queue_capacity: d.queue_capacity,
            reasoning_timeout_ms: d.reasoning_timeout.as_millis() as u64,
            allow_test_input: d.allow_test_input,
        }
    }
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            greeting_delay: Duration::from_millis(self.greeting_delay_ms),
            poll_interval: Duration::from_millis(self.frame_poll_ms.max(1)),
            queue_capacity: self.queue_capacity.max(1),
            reasoning_timeout: Duration::from_millis(self.reasoning_timeout_ms),
            allow_test_input: self.allow_test_input,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Sled directory holding agent profiles.
    pub storage_path: String,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

impl GatewayConfig {
    /// Load config. File path: env `CALLBRIDGE_CONFIG` > `config/gateway.toml`; missing file is fine.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("CALLBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from(Path::new(&config_path))?;
        cfg.fill_keys_from_env();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8000_i64)?
            .set_default("storage_path", "./data/agents")?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        builder
            .add_source(config::Environment::with_prefix("CALLBRIDGE").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Provider keys commonly live in `.env` under their vendor names.
    fn fill_keys_from_env(&mut self) {
        fn fill(slot: &mut String, vars: &[&str]) {
            if slot.is_empty() {
                if let Some(v) = vars.iter().find_map(|k| std::env::var(k).ok()) {
                    *slot = v;
                }
            }
        }
        fill(&mut self.reasoning.api_key, &["OPENROUTER_API_KEY", "LLM_API_KEY"]);
        fill(&mut self.recognizer.api_key, &["DEEPGRAM_API_KEY", "STT_API_KEY"]);
        fill(&mut self.synthesis.batch.api_key, &["TTS_API_KEY", "OPENAI_API_KEY"]);
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
