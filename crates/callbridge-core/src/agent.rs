//! Agent profile: the per-number persona a call is answered with.
//! Read-only to the voice core; written only by operators (see `seed-agents`).

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROMPT: &str = "You are a helpful receptionist.";
pub const DEFAULT_GREETING: &str = "Hello, how can I help you?";
pub const DEFAULT_LLM_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Which synthesis backend speaks for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceProvider {
    /// Request the whole utterance as raw PCM, then stream it out in chunks.
    #[default]
    #[serde(alias = "POLLY")]
    Batch,
    /// Full-duplex streaming socket that returns pre-encoded μ-law frames.
    #[serde(alias = "ELEVENLABS")]
    Duplex,
}

impl VoiceProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceProvider::Batch => "batch",
            VoiceProvider::Duplex => "duplex",
        }
    }
}

/// Snapshot of an agent's configuration, loaded once per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub voice_provider: VoiceProvider,
    pub voice_id: String,
    /// API key for the duplex provider. Without it the batch backend is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplex_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
    #[serde(default = "default_prompt")]
    pub custom_prompt: String,
    #[serde(default = "default_greeting")]
    pub initial_message: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_language() -> String {
    "English".to_string()
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_active() -> bool {
    true
}

impl AgentProfile {
    /// Minimal profile with defaults for everything but identity and voice.
    pub fn new(id: impl Into<String>, name: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            business_name: String::new(),
            language: default_language(),
            voice_provider: VoiceProvider::Batch,
            voice_id: voice_id.into(),
            duplex_api_key: None,
            knowledge_base_id: None,
            custom_prompt: default_prompt(),
            initial_message: default_greeting(),
            llm_model: default_llm_model(),
            is_active: true,
        }
    }

    /// Provider actually used for this call: duplex needs a key, otherwise fall back to batch.
    pub fn effective_provider(&self) -> VoiceProvider {
        match (self.voice_provider, self.duplex_api_key.as_deref()) {
            (VoiceProvider::Duplex, Some(key)) if !key.trim().is_empty() => VoiceProvider::Duplex,
            _ => VoiceProvider::Batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_provider_names_deserialize() {
        let json = r#"{"id":"a1","name":"Support","voice_id":"Joanna","voice_provider":"ELEVENLABS"}"#;
        let agent: AgentProfile = serde_json::from_str(json).unwrap();
        assert_eq!(agent.voice_provider, VoiceProvider::Duplex);
        assert_eq!(agent.initial_message, DEFAULT_GREETING);
        assert_eq!(agent.custom_prompt, DEFAULT_PROMPT);
        assert!(agent.is_active);
    }

    #[test]
    fn duplex_without_key_falls_back_to_batch() {
        let mut agent = AgentProfile::new("a1", "Support", "voice");
        agent.voice_provider = VoiceProvider::Duplex;
        assert_eq!(agent.effective_provider(), VoiceProvider::Batch);

        agent.duplex_api_key = Some("  ".into());
        assert_eq!(agent.effective_provider(), VoiceProvider::Batch);

        agent.duplex_api_key = Some("xi-key".into());
        assert_eq!(agent.effective_provider(), VoiceProvider::Duplex);
    }
}
