//! **Speech-to-Text (STT)**: streaming transcription for a live call.
//!
//! `TranscriptionAdapter` pulls PCM frames from the session's [`FrameSource`] and feeds them to a
//! [`StreamingRecognizer`]; recognition results come back as ordered [`TranscriptEvent`]s.
//! `WsRecognizer` is the production backend (WebSocket, linear16 @ 8 kHz, interim results).

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::frames::FrameSource;

/// One recognition result, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_partial: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_partial: true,
        }
    }

    pub fn final_(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_partial: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum RecognizerError {
    /// Credentials rejected. Fatal for the call's STT; never retried.
    #[error("recognizer rejected credentials: {0}")]
    Unauthorized(String),
    #[error("recognizer failed: {0}")]
    Other(String),
}

/// External streaming recognizer. Consumes PCM16LE 8 kHz mono chunks until the stream ends and
/// pushes results to `results` in the order the service produced them.
#[async_trait]
pub trait StreamingRecognizer: Send + Sync {
    async fn recognize(
        &self,
        audio: BoxStream<'static, Vec<u8>>,
        results: mpsc::Sender<TranscriptEvent>,
    ) -> Result<(), RecognizerError>;
}

pub struct TranscriptionAdapter {
    recognizer: Arc<dyn StreamingRecognizer>,
    poll_interval: Duration,
}

impl TranscriptionAdapter {
    pub fn new(recognizer: Arc<dyn StreamingRecognizer>, poll_interval: Duration) -> Self {
        Self {
            recognizer,
            poll_interval,
        }
    }

    /// Run until the frame source closes or the recognizer gives up.
    ///
    /// Results are forwarded one at a time in the order received; empty ones are skipped.
    /// An authorization failure is logged once and returned as `TranscriptionUnavailable`;
    /// any other recognizer failure is logged and treated as end of stream.
    pub async fn start_stream<F>(&self, source: FrameSource, mut on_event: F) -> VoiceResult<()>
    where
        F: FnMut(TranscriptEvent) + Send,
    {
        let (tx, mut rx) = mpsc::channel::<TranscriptEvent>(64);
        let audio = source.into_pcm_stream(self.poll_interval).boxed();

        let recognize = self.recognizer.recognize(audio, tx);
        let forward = async {
            while let Some(event) = rx.recv().await {
                if event.text.trim().is_empty() {
                    continue;
                }
                on_event(event);
            }
        };
        let (outcome, ()) = tokio::join!(recognize, forward);

        match outcome {
            Ok(()) => {
                debug!("transcription stream ended");
                Ok(())
            }
            Err(RecognizerError::Unauthorized(msg)) => {
                error!(reason = %msg, "transcription unavailable for this call, continuing without STT");
                Err(VoiceError::TranscriptionUnavailable(msg))
            }
            Err(RecognizerError::Other(msg)) => {
                warn!(reason = %msg, "transcription stream failed, continuing without STT");
                Ok(())
            }
        }
    }
}

/// Settings for [`WsRecognizer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// e.g. `wss://api.deepgram.com/v1/listen`
    pub url: String,
    pub api_key: String,
    pub language: String,
    pub sample_rate: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: String::new(),
            language: "en-US".to_string(),
            sample_rate: 8000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecognizerResult {
    channel: Option<ResultChannel>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct ResultChannel {
    #[serde(default)]
    alternatives: Vec<ResultAlternative>,
}

#[derive(Debug, Deserialize)]
struct ResultAlternative {
    #[serde(default)]
    transcript: String,
}

/// Parse one service message. Non-result messages (metadata, keepalive acks) yield `None`.
fn parse_result(raw: &str) -> Option<TranscriptEvent> {
    let parsed: RecognizerResult = serde_json::from_str(raw).ok()?;
    let text = parsed.channel?.alternatives.into_iter().next()?.transcript;
    Some(TranscriptEvent {
        text,
        is_partial: !parsed.is_final,
    })
}

/// Production recognizer over a streaming WebSocket API.
pub struct WsRecognizer {
    config: RecognizerConfig,
}

impl WsRecognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}?encoding=linear16&sample_rate={}&channels=1&interim_results=true&language={}",
            self.config.url.trim_end_matches('/'),
            self.config.sample_rate,
            self.config.language
        )
    }
}

fn other(err: impl std::fmt::Display) -> RecognizerError {
    RecognizerError::Other(err.to_string())
}

#[async_trait]
impl StreamingRecognizer for WsRecognizer {
    async fn recognize(
        &self,
        mut audio: BoxStream<'static, Vec<u8>>,
        results: mpsc::Sender<TranscriptEvent>,
    ) -> Result<(), RecognizerError> {
        if self.config.api_key.trim().is_empty() {
            return Err(RecognizerError::Unauthorized("no recognizer API key configured".into()));
        }
        let mut request = self.endpoint().into_client_request().map_err(other)?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key)).map_err(other)?;
        request.headers_mut().insert("Authorization", auth);

        let (ws, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(ok) => ok,
            Err(WsError::Http(resp))
                if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN =>
            {
                return Err(RecognizerError::Unauthorized(format!("handshake rejected: {}", resp.status())));
            }
            Err(e) => return Err(other(e)),
        };
        info!("recognizer stream open");
        let (mut sink, mut stream) = ws.split();

        let send = async move {
            while let Some(pcm) = audio.next().await {
                sink.send(Message::Binary(pcm)).await.map_err(other)?;
            }
            // Ask the service to flush pending finals and close its side.
            sink.send(Message::Text(r#"{"type":"CloseStream"}"#.to_string()))
                .await
                .map_err(other)?;
            Ok::<(), RecognizerError>(())
        };
        let receive = async move {
            while let Some(msg) = stream.next().await {
                match msg.map_err(other)? {
                    Message::Text(raw) => {
                        if let Some(event) = parse_result(&raw) {
                            if results.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Ok::<(), RecognizerError>(())
        };

        tokio::try_join!(send, receive)?;
        Ok(())
    }
}
