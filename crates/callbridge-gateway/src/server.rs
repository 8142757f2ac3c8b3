//! HTTP surface: `/health` and the `/media-stream/:agent_id` WebSocket, one session per socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use callbridge_core::{AgentLookup, AgentProfile, Reasoning};
use callbridge_voice::{
    controller_for, run_session, InboundEvent, OutboundEvent, PlaybackController, SessionConfig, SessionDeps,
    StreamingRecognizer, SynthesisConfig, VoiceError, VoiceResult,
};

/// Builds the synthesis backend for a call from its agent profile.
pub type PlaybackFactory = Arc<dyn Fn(&AgentProfile) -> Arc<dyn PlaybackController> + Send + Sync>;

const INBOUND_BUFFER: usize = 256;

pub struct AppState {
    pub agents: Arc<dyn AgentLookup>,
    pub reasoning: Arc<dyn Reasoning>,
    pub recognizer: Arc<dyn StreamingRecognizer>,
    pub playback: PlaybackFactory,
    pub session: SessionConfig,
}

impl AppState {
    /// Production wiring: playback backend chosen per agent from `synthesis`.
    pub fn new(
        agents: Arc<dyn AgentLookup>,
        reasoning: Arc<dyn Reasoning>,
        recognizer: Arc<dyn StreamingRecognizer>,
        synthesis: SynthesisConfig,
        session: SessionConfig,
    ) -> Self {
        let playback: PlaybackFactory = Arc::new(move |agent: &AgentProfile| controller_for(agent, &synthesis));
        Self {
            agents,
            reasoning,
            recognizer,
            playback,
            session,
        }
    }

    /// Active agent for the connection, or `InvalidSession`.
    pub fn resolve_agent(&self, agent_id: &str) -> VoiceResult<AgentProfile> {
        match self.agents.find_agent_by_id(agent_id)? {
            Some(agent) if agent.is_active => Ok(agent),
            Some(_) => Err(VoiceError::InvalidSession(format!("agent {agent_id} is inactive"))),
            None => Err(VoiceError::InvalidSession(format!("unknown agent {agent_id:?}"))),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/media-stream/:agent_id", get(media_stream))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn media_stream(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_call(socket, agent_id, state))
}

async fn handle_call(mut socket: WebSocket, agent_id: String, state: Arc<AppState>) {
    let agent = match state.resolve_agent(&agent_id) {
        Ok(agent) => agent,
        Err(e) => {
            warn!(%agent_id, error = %e, "rejecting media stream");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "unserializable outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(raw) => match InboundEvent::parse(&raw) {
                    Ok(event) => {
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "unparseable transport message"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let deps = SessionDeps {
        reasoning: state.reasoning.clone(),
        recognizer: state.recognizer.clone(),
        playback: (state.playback)(&agent),
    };
    if let Err(e) = run_session(agent, deps, state.session.clone(), inbound_rx, outbound_tx).await {
        warn!(%agent_id, error = %e, "call ended with error");
    }

    reader.abort();
    let _ = writer.await;
    info!(%agent_id, "media stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callbridge_core::CoreResult;
    use callbridge_voice::RecognizerError;
    use futures_util::stream::BoxStream;
    use std::collections::HashMap;

    struct MapStore(HashMap<String, AgentProfile>);

    impl AgentLookup for MapStore {
        fn find_agent_by_id(&self, id: &str) -> CoreResult<Option<AgentProfile>> {
            Ok(self.0.get(id).cloned())
        }
    }

    struct Echo;

    #[async_trait]
    impl Reasoning for Echo {
        async fn process_query(&self, text: &str, _agent: &AgentProfile) -> String {
            text.to_string()
        }
    }

    struct Deaf;

    #[async_trait]
    impl StreamingRecognizer for Deaf {
        async fn recognize(
            &self,
            _audio: BoxStream<'static, Vec<u8>>,
            _results: mpsc::Sender<callbridge_voice::TranscriptEvent>,
        ) -> Result<(), RecognizerError> {
            Ok(())
        }
    }

    fn state_with(agents: Vec<AgentProfile>) -> AppState {
        let map = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
        AppState::new(
            Arc::new(MapStore(map)),
            Arc::new(Echo),
            Arc::new(Deaf),
            SynthesisConfig::default(),
            SessionConfig::default(),
        )
    }

    #[test]
    fn unknown_and_inactive_agents_are_invalid_sessions() {
        let mut inactive = AgentProfile::new("old", "Old", "v");
        inactive.is_active = false;
        let state = state_with(vec![AgentProfile::new("support", "Support", "Joanna"), inactive]);

        assert_eq!(state.resolve_agent("support").unwrap().name, "Support");
        assert!(matches!(state.resolve_agent("missing"), Err(VoiceError::InvalidSession(_))));
        assert!(matches!(state.resolve_agent("old"), Err(VoiceError::InvalidSession(_))));
    }

    #[test]
    fn playback_backend_follows_agent_profile() {
        let state = state_with(vec![]);
        let mut agent = AgentProfile::new("a", "A", "voice");
        agent.voice_provider = callbridge_core::VoiceProvider::Duplex;
        agent.duplex_api_key = Some("xi".into());
        assert_eq!((state.playback)(&agent).provider(), callbridge_core::VoiceProvider::Duplex);
    }
}
