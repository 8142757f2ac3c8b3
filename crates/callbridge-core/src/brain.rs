//! Brain: turns a caller utterance into the agent's spoken reply.
//! Knowledge-base agents go through the retrieval backend; everyone else goes straight to an
//! OpenAI-compatible chat-completions endpoint (OpenRouter by default). Never raises: every
//! failure becomes a short apology the caller can hear.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::AgentProfile;
use crate::error::{CoreError, CoreResult};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const CONCISE_INSTRUCTION: &str =
    "IMPORTANT: Keep your response concise, under 2 sentences if possible. Do not ramble. Be direct and to the point.";

pub const KB_NO_ANSWER: &str = "I'm sorry, I didn't find an answer in the knowledge base.";
pub const KB_FAILURE: &str = "I'm having trouble accessing my knowledge base right now.";
pub const LLM_FAILURE: &str = "I'm having trouble thinking right now.";

/// Reasoning collaborator consumed by the session orchestrator.
#[async_trait]
pub trait Reasoning: Send + Sync {
    /// Always yields something speakable; failures map to a fixed fallback phrase.
    async fn process_query(&self, text: &str, agent: &AgentProfile) -> String;
}

/// Endpoint settings for [`BrainService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: String,
    /// Used when the agent's own model id is blank.
    pub default_model: String,
    pub max_tokens: u32,
    /// Retrieval-and-generate endpoint for knowledge-base agents. `None` disables that path.
    pub knowledge_url: Option<String>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key: String::new(),
            default_model: crate::agent::DEFAULT_LLM_MODEL.to_string(),
            max_tokens: 1000,
            knowledge_url: None,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeRequest<'a> {
    knowledge_base_id: &'a str,
    input: KnowledgeInput<'a>,
}

#[derive(Serialize)]
struct KnowledgeInput<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct KnowledgeResponse {
    output: Option<KnowledgeOutput>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeOutput {
    text: Option<String>,
}

/// System prompt sent on the direct path: the agent's prompt plus the conciseness rule.
pub fn concise_system_prompt(custom_prompt: &str) -> String {
    format!("{}\n\n{}", custom_prompt.trim(), CONCISE_INSTRUCTION)
}

fn first_choice(body: &str) -> CoreResult<String> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(CoreError::EmptyReply)
}

fn knowledge_text(body: &str) -> CoreResult<Option<String>> {
    let parsed: KnowledgeResponse = serde_json::from_str(body)?;
    Ok(parsed
        .output
        .and_then(|o| o.text)
        .filter(|t| !t.trim().is_empty()))
}

pub struct BrainService {
    client: reqwest::Client,
    config: ReasoningConfig,
}

impl BrainService {
    pub fn new(config: ReasoningConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> CoreResult<String> {
        let mut req = self.client.post(url).json(body);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(CoreError::Upstream(status.as_u16(), text));
        }
        Ok(text)
    }

    async fn query_knowledge_base(&self, text: &str, kb_id: &str) -> String {
        let Some(url) = self.config.knowledge_url.as_deref() else {
            tracing::warn!(kb_id, "knowledge base requested but no retrieval endpoint configured");
            return KB_FAILURE.to_string();
        };
        let body = KnowledgeRequest {
            knowledge_base_id: kb_id,
            input: KnowledgeInput { text },
        };
        match self.post_json(url, &body).await.and_then(|b| knowledge_text(&b)) {
            Ok(Some(answer)) => answer,
            Ok(None) => KB_NO_ANSWER.to_string(),
            Err(e) => {
                tracing::warn!(kb_id, error = %e, "knowledge base query failed");
                KB_FAILURE.to_string()
            }
        }
    }

    async fn query_llm(&self, text: &str, agent: &AgentProfile) -> String {
        let system = concise_system_prompt(&agent.custom_prompt);
        let model = if agent.llm_model.trim().is_empty() {
            self.config.default_model.as_str()
        } else {
            agent.llm_model.as_str()
        };
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: self.config.max_tokens,
            stream: false,
        };
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        match self.post_json(&url, &body).await.and_then(|b| first_choice(&b)) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(model, error = %e, "chat completion failed");
                LLM_FAILURE.to_string()
            }
        }
    }
}

#[async_trait]
impl Reasoning for BrainService {
    async fn process_query(&self, text: &str, agent: &AgentProfile) -> String {
        tracing::debug!(agent_id = %agent.id, chars = text.len(), "reasoning request");
        match agent.knowledge_base_id.as_deref().filter(|id| !id.trim().is_empty()) {
            Some(kb_id) => self.query_knowledge_base(text, kb_id).await,
            None => self.query_llm(text, agent).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> ReasoningConfig {
        ReasoningConfig {
            base_url: "http://127.0.0.1:1".into(),
            knowledge_url: Some("http://127.0.0.1:1/retrieve".into()),
            ..ReasoningConfig::default()
        }
    }

    #[test]
    fn system_prompt_carries_conciseness_rule() {
        let prompt = concise_system_prompt("You are a helpful receptionist.");
        assert!(prompt.starts_with("You are a helpful receptionist.\n\n"));
        assert!(prompt.ends_with(CONCISE_INSTRUCTION));
    }

    #[test]
    fn chat_reply_is_first_choice_trimmed() {
        let body = r#"{"choices":[{"message":{"content":"  We open at nine. "}}]}"#;
        assert_eq!(first_choice(body).unwrap(), "We open at nine.");
        assert!(matches!(first_choice(r#"{"choices":[]}"#), Err(CoreError::EmptyReply)));
    }

    #[test]
    fn blank_knowledge_output_is_no_answer() {
        assert_eq!(knowledge_text(r#"{"output":{"text":"  "}}"#).unwrap(), None);
        assert_eq!(
            knowledge_text(r#"{"output":{"text":"Refunds take 5 days."}}"#).unwrap(),
            Some("Refunds take 5 days.".to_string())
        );
    }

    #[tokio::test]
    async fn llm_failure_yields_fallback_phrase() {
        let brain = BrainService::new(unreachable_config());
        let agent = AgentProfile::new("a1", "Support", "Joanna");
        assert_eq!(brain.process_query("hello", &agent).await, LLM_FAILURE);
    }

    #[tokio::test]
    async fn knowledge_failure_yields_fallback_phrase() {
        let brain = BrainService::new(unreachable_config());
        let mut agent = AgentProfile::new("a1", "Support", "Joanna");
        agent.knowledge_base_id = Some("kb-1".into());
        assert_eq!(brain.process_query("hello", &agent).await, KB_FAILURE);
    }
}
