//! **Playback**: cancellable streaming synthesis and the barge-in kill-switch.
//!
//! A [`PlaybackController`] turns reply text into μ-law frames pushed to a [`MediaSink`].
//! Every utterance gets its own [`PlaybackHandle`]; `stop()` on the handle is final and no frame
//! reaches the sink once it has returned.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use callbridge_core::{AgentProfile, VoiceProvider};

use crate::codec;
use crate::error::{VoiceError, VoiceResult};
use crate::resample::{resample_pcm16, TELEPHONY_RATE};

/// Downstream for synthesized μ-law audio. Must not block.
pub trait MediaSink: Send + Sync {
    /// Returns `false` when the downstream is gone.
    fn push(&self, mulaw: Vec<u8>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Synthesizing,
    Streaming,
    Stopped,
}

/// One utterance's playback. Clones share state.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    provider: VoiceProvider,
    token: CancellationToken,
    state: Arc<Mutex<PlaybackState>>,
}

impl PlaybackHandle {
    pub fn new(provider: VoiceProvider, token: CancellationToken) -> Self {
        Self {
            provider,
            token,
            state: Arc::new(Mutex::new(PlaybackState::Idle)),
        }
    }

    pub fn provider(&self) -> VoiceProvider {
        self.provider
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Resolves once the handle is stopped (or its parent session is cancelled).
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn begin_synthesis(&self) -> bool {
        self.transition(PlaybackState::Synthesizing)
    }

    fn transition(&self, next: PlaybackState) -> bool {
        let mut state = self.state.lock();
        if *state == PlaybackState::Stopped || self.token.is_cancelled() {
            return false;
        }
        *state = next;
        true
    }

    /// Push one frame unless stopped. The state lock is held across the push, so a concurrent
    /// `stop()` either waits for this frame or prevents it.
    pub fn emit(&self, sink: &dyn MediaSink, mulaw: Vec<u8>) -> bool {
        let mut state = self.state.lock();
        if *state == PlaybackState::Stopped || self.token.is_cancelled() {
            return false;
        }
        *state = PlaybackState::Streaming;
        sink.push(mulaw)
    }

    /// Stop for good. Returns `true` only for the call that performed the stop.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PlaybackState::Stopped {
            return false;
        }
        *state = PlaybackState::Stopped;
        drop(state);
        self.token.cancel();
        true
    }

    /// Mark natural completion. Leaves the token alone.
    pub fn finish(&self) {
        *self.state.lock() = PlaybackState::Stopped;
    }
}

/// Uniform streaming-synthesis contract over the two backends.
#[async_trait]
pub trait PlaybackController: Send + Sync {
    fn provider(&self) -> VoiceProvider;

    /// Synthesize `text` and push frames through `handle` to `sink`. Returns when synthesis is
    /// exhausted or the handle is cancelled.
    async fn generate_stream(&self, text: &str, handle: &PlaybackHandle, sink: &dyn MediaSink) -> VoiceResult<()>;

    /// Cooperative cancellation; once this returns nothing more reaches the sink.
    fn stop(&self, handle: &PlaybackHandle) {
        if handle.stop() {
            debug!(provider = self.provider().as_str(), "playback stopped");
        }
    }
}

/// Batch synthesis endpoint (OpenAI-compatible `/audio/speech` returning raw PCM).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSynthesisConfig {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Outbound frame length.
    pub chunk_ms: u64,
    /// Rate of the PCM the endpoint returns (OpenAI `pcm` is 24 kHz). Resampled to 8 kHz.
    pub source_rate: u32,
}

impl Default for BatchSynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            chunk_ms: 20,
            source_rate: 24_000,
        }
    }
}

impl BatchSynthesisConfig {
    /// 8 kHz PCM16 bytes per outbound chunk.
    pub fn chunk_bytes(&self) -> usize {
        let samples = (TELEPHONY_RATE as u64 * self.chunk_ms / 1000).max(1) as usize;
        samples * 2
    }
}

/// Request the whole utterance as raw PCM, bring it to 8 kHz, then stream it out in fixed-size
/// μ-law chunks.
pub struct BatchPlayback {
    client: reqwest::Client,
    config: BatchSynthesisConfig,
    voice_id: String,
}

impl BatchPlayback {
    pub fn new(config: BatchSynthesisConfig, voice_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            voice_id: voice_id.into(),
        }
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let url = format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "input": text,
            "voice": self.voice_id,
            "response_format": "pcm",
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!("TTS API error {}: {}", status, body)));
        }
        Ok(res.bytes().await?.to_vec())
    }

    /// Provider PCM to 8 kHz telephony PCM.
    fn telephony_pcm(&self, raw: &[u8]) -> VoiceResult<Vec<u8>> {
        resample_pcm16(raw, self.config.source_rate, TELEPHONY_RATE)
    }
}

/// Stream PCM out as μ-law chunks until exhausted, stopped, or the sink goes away.
pub fn stream_pcm_chunks(pcm: &[u8], chunk_bytes: usize, handle: &PlaybackHandle, sink: &dyn MediaSink) -> usize {
    let mut sent = 0;
    for chunk in pcm.chunks(chunk_bytes.max(2)) {
        if !handle.emit(sink, codec::encode(chunk)) {
            break;
        }
        sent += 1;
    }
    sent
}

#[async_trait]
impl PlaybackController for BatchPlayback {
    fn provider(&self) -> VoiceProvider {
        VoiceProvider::Batch
    }

    async fn generate_stream(&self, text: &str, handle: &PlaybackHandle, sink: &dyn MediaSink) -> VoiceResult<()> {
        let text = text.trim();
        if text.is_empty() || !handle.begin_synthesis() {
            return Ok(());
        }
        let raw = tokio::select! {
            _ = handle.cancelled() => return Ok(()),
            raw = self.synthesize(text) => raw?,
        };
        let pcm = self.telephony_pcm(&raw)?;
        let frames = stream_pcm_chunks(&pcm, self.config.chunk_bytes(), handle, sink);
        debug!(frames, bytes = pcm.len(), "batch playback streamed");
        Ok(())
    }
}

/// Full-duplex streaming synthesis endpoint (ElevenLabs `stream-input` dialect).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexSynthesisConfig {
    /// e.g. `wss://api.elevenlabs.io/v1`
    pub base_url: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for DuplexSynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://api.elevenlabs.io/v1".to_string(),
            model_id: "eleven_turbo_v2_5".to_string(),
            stability: 0.5,
            similarity_boost: 0.8,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuplexChunk {
    audio: Option<String>,
    #[serde(default)]
    is_final: Option<bool>,
}

/// Persistent socket per utterance: prime, send text, send end-of-text, relay μ-law until final.
pub struct DuplexPlayback {
    config: DuplexSynthesisConfig,
    api_key: String,
    voice_id: String,
}

impl DuplexPlayback {
    pub fn new(config: DuplexSynthesisConfig, api_key: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            voice_id: voice_id.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/text-to-speech/{}/stream-input?model_id={}&output_format=ulaw_8000",
            self.config.base_url.trim_end_matches('/'),
            self.voice_id,
            self.config.model_id
        )
    }

    fn priming_message(&self) -> String {
        serde_json::json!({
            "text": " ",
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
            },
            "xi_api_key": self.api_key,
        })
        .to_string()
    }

    async fn relay(&self, text: &str, handle: &PlaybackHandle, sink: &dyn MediaSink) -> VoiceResult<usize> {
        let (ws, _) = tokio_tungstenite::connect_async(self.endpoint()).await?;
        let (mut tx, mut rx) = ws.split();

        tx.send(Message::Text(self.priming_message())).await?;
        tx.send(Message::Text(serde_json::json!({ "text": text }).to_string())).await?;
        tx.send(Message::Text(serde_json::json!({ "text": "" }).to_string())).await?;

        let mut frames = 0;
        while let Some(msg) = rx.next().await {
            let raw = match msg? {
                Message::Text(raw) => raw,
                Message::Close(_) => break,
                _ => continue,
            };
            let chunk: DuplexChunk = serde_json::from_str(&raw)?;
            if let Some(audio) = chunk.audio.filter(|a| !a.is_empty()) {
                let mulaw = STANDARD.decode(audio.as_bytes())?;
                if !handle.emit(sink, mulaw) {
                    break;
                }
                frames += 1;
            }
            if chunk.is_final == Some(true) {
                break;
            }
        }
        let _ = tx.close().await;
        Ok(frames)
    }
}

#[async_trait]
impl PlaybackController for DuplexPlayback {
    fn provider(&self) -> VoiceProvider {
        VoiceProvider::Duplex
    }

    async fn generate_stream(&self, text: &str, handle: &PlaybackHandle, sink: &dyn MediaSink) -> VoiceResult<()> {
        let text = text.trim();
        if text.is_empty() || !handle.begin_synthesis() {
            return Ok(());
        }
        // Dropping the relay future on cancel drops the socket, which closes the connection.
        tokio::select! {
            _ = handle.cancelled() => {
                debug!("duplex playback cancelled, connection dropped");
                Ok(())
            }
            res = self.relay(text, handle, sink) => {
                let frames = res?;
                debug!(frames, "duplex playback streamed");
                Ok(())
            }
        }
    }
}

/// Settings for both synthesis backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub batch: BatchSynthesisConfig,
    pub duplex: DuplexSynthesisConfig,
}

/// Pick the backend for a call from the agent profile. Duplex without a key falls back to batch.
pub fn controller_for(agent: &AgentProfile, config: &SynthesisConfig) -> Arc<dyn PlaybackController> {
    match (agent.effective_provider(), agent.duplex_api_key.as_deref()) {
        (VoiceProvider::Duplex, Some(key)) => {
            info!(voice = %agent.voice_id, "using duplex synthesis");
            Arc::new(DuplexPlayback::new(config.duplex.clone(), key, agent.voice_id.clone()))
        }
        _ => {
            if agent.voice_provider == VoiceProvider::Duplex {
                warn!(agent_id = %agent.id, "duplex provider without API key, falling back to batch");
            }
            Arc::new(BatchPlayback::new(config.batch.clone(), agent.voice_id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    #[derive(Default)]
    struct VecSink(Mutex<Vec<Vec<u8>>>);

    impl MediaSink for VecSink {
        fn push(&self, mulaw: Vec<u8>) -> bool {
            self.0.lock().push(mulaw);
            true
        }
    }

    fn handle() -> PlaybackHandle {
        PlaybackHandle::new(VoiceProvider::Batch, CancellationToken::new())
    }

    /// Records frames and wakes a waiter on each one.
    #[derive(Default)]
    struct NotifySink {
        frames: Mutex<Vec<Vec<u8>>>,
        arrived: tokio::sync::Notify,
    }

    impl MediaSink for NotifySink {
        fn push(&self, mulaw: Vec<u8>) -> bool {
            self.frames.lock().push(mulaw);
            self.arrived.notify_one();
            true
        }
    }

    async fn synthesis_server() -> (TcpListener, DuplexPlayback) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = DuplexSynthesisConfig {
            base_url: format!("ws://{}/v1", listener.local_addr().unwrap()),
            ..Default::default()
        };
        (listener, DuplexPlayback::new(config, "xi-key", "voice-1"))
    }

    async fn read_texts(ws: &mut WebSocketStream<TcpStream>, n: usize) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while out.len() < n {
            match ws.next().await {
                Some(Ok(Message::Text(raw))) => out.push(serde_json::from_str(&raw).unwrap()),
                Some(Ok(_)) => continue,
                other => panic!("synthesis socket ended early: {other:?}"),
            }
        }
        out
    }

    fn audio_chunk(bytes: &[u8], is_final: bool) -> Message {
        Message::Text(serde_json::json!({ "audio": STANDARD.encode(bytes), "isFinal": is_final }).to_string())
    }

    #[test]
    fn pcm_is_chunked_into_20ms_frames() {
        let config = BatchSynthesisConfig::default();
        assert_eq!(config.chunk_bytes(), 320);

        let sink = VecSink::default();
        let h = handle();
        let sent = stream_pcm_chunks(&vec![0u8; 320 * 3 + 100], config.chunk_bytes(), &h, &sink);
        assert_eq!(sent, 4);
        let frames = sink.0.lock();
        assert_eq!(frames[0].len(), 160);
        assert_eq!(frames[3].len(), 50);
        assert_eq!(h.state(), PlaybackState::Streaming);
    }

    #[test]
    fn provider_pcm_is_resampled_before_chunking() {
        let batch = BatchPlayback::new(BatchSynthesisConfig::default(), "alloy");
        // 100 ms of 24 kHz provider audio.
        let pcm = batch.telephony_pcm(&vec![0u8; 4_800]).unwrap();
        assert_eq!(pcm.len(), 1_600);

        let sink = VecSink::default();
        let sent = stream_pcm_chunks(&pcm, batch.config.chunk_bytes(), &handle(), &sink);
        assert_eq!(sent, 5);
        assert!(sink.0.lock().iter().all(|frame| frame.len() == 160));
    }

    #[test]
    fn nothing_is_emitted_after_stop() {
        let sink = VecSink::default();
        let h = handle();
        assert!(h.emit(&sink, vec![1]));
        assert!(h.stop());
        assert!(!h.stop());
        assert!(!h.emit(&sink, vec![2]));
        assert!(h.is_cancelled());
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn cancelled_parent_blocks_emission() {
        let parent = CancellationToken::new();
        let h = PlaybackHandle::new(VoiceProvider::Batch, parent.child_token());
        parent.cancel();
        assert!(!h.begin_synthesis());
        assert!(!h.emit(&VecSink::default(), vec![1]));
    }

    #[test]
    fn duplex_priming_carries_voice_settings() {
        let duplex = DuplexPlayback::new(DuplexSynthesisConfig::default(), "xi-key", "voice-1");
        let prime: serde_json::Value = serde_json::from_str(&duplex.priming_message()).unwrap();
        assert_eq!(prime["text"], " ");
        assert_eq!(prime["voice_settings"]["stability"], 0.5);
        assert!((prime["voice_settings"]["similarity_boost"].as_f64().unwrap() - 0.8).abs() < 1e-6);
        assert!(duplex.endpoint().ends_with("/text-to-speech/voice-1/stream-input?model_id=eleven_turbo_v2_5&output_format=ulaw_8000"));
    }

    #[tokio::test]
    async fn duplex_primes_sends_text_and_relays_until_final() {
        let (listener, duplex) = synthesis_server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let received = read_texts(&mut ws, 3).await;
            let _ = ws.send(audio_chunk(&[1, 2, 3], false)).await;
            let _ = ws
                .send(Message::Text(r#"{"audio":null,"alignment":{}}"#.to_string()))
                .await;
            let _ = ws.send(audio_chunk(&[4], true)).await;
            let _ = ws.send(audio_chunk(&[9], false)).await;
            received
        });

        let sink = VecSink::default();
        let h = PlaybackHandle::new(VoiceProvider::Duplex, CancellationToken::new());
        duplex.generate_stream(" We open at nine. ", &h, &sink).await.unwrap();

        assert_eq!(*sink.0.lock(), vec![vec![1u8, 2, 3], vec![4u8]]);
        let received = server.await.unwrap();
        assert_eq!(received[0]["text"], " ");
        assert_eq!(received[0]["xi_api_key"], "xi-key");
        assert_eq!(received[0]["voice_settings"]["stability"], 0.5);
        assert_eq!(received[1]["text"], "We open at nine.");
        assert_eq!(received[2]["text"], "");
    }

    #[tokio::test]
    async fn duplex_stop_mid_stream_hangs_up() {
        let (listener, duplex) = synthesis_server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            read_texts(&mut ws, 3).await;
            ws.send(audio_chunk(&[7; 160], false)).await.unwrap();
            // Keep the utterance open; the client has to hang up.
            let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("client never hung up");
            matches!(next, None | Some(Err(_)) | Some(Ok(Message::Close(_))))
        });

        let sink = NotifySink::default();
        let h = PlaybackHandle::new(VoiceProvider::Duplex, CancellationToken::new());
        let stopper = async {
            sink.arrived.notified().await;
            duplex.stop(&h);
        };
        let (res, ()) = tokio::join!(duplex.generate_stream("Please hold.", &h, &sink), stopper);
        res.unwrap();

        assert!(server.await.unwrap(), "synthesis socket still open after stop");
        assert_eq!(sink.frames.lock().len(), 1);
        assert_eq!(h.state(), PlaybackState::Stopped);
        assert!(!h.emit(&sink, vec![0]));
    }

    #[test]
    fn duplex_without_key_uses_batch() {
        let mut agent = AgentProfile::new("a1", "Support", "Joanna");
        agent.voice_provider = VoiceProvider::Duplex;
        let config = SynthesisConfig::default();
        assert_eq!(controller_for(&agent, &config).provider(), VoiceProvider::Batch);

        agent.duplex_api_key = Some("xi-key".into());
        assert_eq!(controller_for(&agent, &config).provider(), VoiceProvider::Duplex);
    }
}
