//! Session orchestrator: one call, one owned [`CallSession`], one event loop.
//!
//! Transport events, transcripts, timer expiry and playback output are all serialized onto the
//! loop in [`run_session`]. Playback runs in spawned turn tasks whose frames come back through
//! the loop tagged with a turn generation; frames from a generation that is no longer active
//! are dropped, so a `clear` always precedes any later `media`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use callbridge_core::{AgentProfile, Reasoning};

use crate::error::{VoiceError, VoiceResult};
use crate::frames::{frame_queue, AudioEncoding, AudioFrame, FrameProducer, DEFAULT_QUEUE_CAPACITY};
use crate::playback::{MediaSink, PlaybackController, PlaybackHandle};
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::stt::{StreamingRecognizer, TranscriptEvent, TranscriptionAdapter};
use crate::turn::{TurnAction, TurnInput, TurnState, TurnTaker};

/// Spoken when reasoning does not answer in time.
pub const REASONING_TIMEOUT_REPLY: &str = "I am having trouble connecting to my brain right now.";

/// Timing and feature switches for one call.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Silence after the last final fragment before the utterance is flushed (default: 2000ms)
    pub debounce: Duration,

    /// Delay between stream start and the greeting (default: 500ms)
    pub greeting_delay: Duration,

    /// Frame source poll interval when the queue is empty (default: 20ms)
    pub poll_interval: Duration,

    pub queue_capacity: usize,

    /// Upper bound on one reasoning call (default: 15s)
    pub reasoning_timeout: Duration,

    /// Accept debug `test_input` events from the transport.
    pub allow_test_input: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            greeting_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reasoning_timeout: Duration::from_secs(15),
            allow_test_input: true,
        }
    }
}

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub reasoning: Arc<dyn Reasoning>,
    pub recognizer: Arc<dyn StreamingRecognizer>,
    pub playback: Arc<dyn PlaybackController>,
}

/// Internal loop messages from the adapter and turn tasks.
#[derive(Debug)]
enum SessionEvent {
    Transcript(TranscriptEvent),
    Outbound { generation: u64, mulaw: Vec<u8> },
    PlaybackFinished { generation: u64 },
}

/// Routes a turn task's frames back to the session loop.
struct TurnSink {
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl MediaSink for TurnSink {
    fn push(&self, mulaw: Vec<u8>) -> bool {
        self.events
            .send(SessionEvent::Outbound {
                generation: self.generation,
                mulaw,
            })
            .is_ok()
    }
}

struct ActivePlayback {
    generation: u64,
    handle: PlaybackHandle,
}

/// Per-call state, owned by the loop.
struct CallSession {
    agent: Arc<AgentProfile>,
    deps: SessionDeps,
    config: SessionConfig,
    stream_sid: Option<String>,
    inbound_encoding: AudioEncoding,
    turn: TurnTaker,
    debounce_at: Option<Instant>,
    greeting_at: Option<Instant>,
    generation: u64,
    active: Option<ActivePlayback>,
    frames: Option<FrameProducer>,
    token: CancellationToken,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

impl CallSession {
    fn send(&self, event: OutboundEvent) -> VoiceResult<()> {
        self.outbound
            .send(event)
            .map_err(|_| VoiceError::Transport("media socket closed".into()))
    }

    fn on_inbound(&mut self, event: InboundEvent) -> VoiceResult<()> {
        match event {
            InboundEvent::Start { start } => {
                if self.stream_sid.is_some() {
                    debug!("duplicate start ignored");
                    return Ok(());
                }
                Span::current().record("stream_sid", start.stream_sid.as_str());
                self.inbound_encoding = start.inbound_encoding();
                info!(stream_sid = %start.stream_sid, encoding = ?self.inbound_encoding, "stream started");
                self.stream_sid = Some(start.stream_sid);
                if !self.agent.initial_message.trim().is_empty() {
                    self.greeting_at = Some(Instant::now() + self.config.greeting_delay);
                }
                self.apply(TurnInput::Start)
            }
            InboundEvent::Media { media } => {
                let audio = match media.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!(error = %e, "undecodable media payload");
                        return Ok(());
                    }
                };
                // μ-law is transcoded to PCM on the adapter side of the queue.
                if let Some(frames) = self.frames.as_mut() {
                    frames.push(AudioFrame::new(self.inbound_encoding, audio));
                }
                Ok(())
            }
            InboundEvent::Stop => {
                info!("stop received");
                self.apply(TurnInput::Stop)
            }
            InboundEvent::TestInput { text } => {
                if !self.config.allow_test_input {
                    warn!("test_input received but disabled");
                    return Ok(());
                }
                info!(%text, "test input");
                self.apply(TurnInput::DirectInput(text))
            }
            InboundEvent::Connected | InboundEvent::Mark | InboundEvent::Dtmf | InboundEvent::Unknown => Ok(()),
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) -> VoiceResult<()> {
        match event {
            SessionEvent::Transcript(t) => {
                debug!(text = %t.text, partial = t.is_partial, "transcript");
                self.apply(TurnInput::Transcript(t))
            }
            SessionEvent::Outbound { generation, mulaw } => {
                if self.active.as_ref().map(|a| a.generation) != Some(generation) {
                    debug!(generation, "dropping stale playback frame");
                    return Ok(());
                }
                // Replies to debug input may precede `start`; they go out with an empty sid.
                let sid = self.stream_sid.as_deref().unwrap_or_default();
                self.send(OutboundEvent::media(sid, &mulaw))
            }
            SessionEvent::PlaybackFinished { generation } => {
                if self.active.as_ref().map(|a| a.generation) != Some(generation) {
                    return Ok(());
                }
                self.active = None;
                debug!(generation, "playback finished");
                self.apply(TurnInput::PlaybackFinished)
            }
        }
    }

    /// Feed the turn machine and carry out its actions in order.
    fn apply(&mut self, input: TurnInput) -> VoiceResult<()> {
        for action in self.turn.handle(input) {
            self.execute(action)?;
        }
        self.turn.resume_listening();
        Ok(())
    }

    fn execute(&mut self, action: TurnAction) -> VoiceResult<()> {
        match action {
            TurnAction::CancelPlayback => {
                if let Some(active) = self.active.take() {
                    self.deps.playback.stop(&active.handle);
                }
            }
            TurnAction::ClearDownstream => {
                if let Some(sid) = &self.stream_sid {
                    self.send(OutboundEvent::clear(sid))?;
                }
            }
            TurnAction::ArmDebounce => self.debounce_at = Some(Instant::now() + self.config.debounce),
            TurnAction::CancelDebounce => self.debounce_at = None,
            TurnAction::Respond(text) => self.start_turn(text),
        }
        Ok(())
    }

    /// Spawn reasoning plus playback for one utterance under a fresh generation.
    fn start_turn(&mut self, text: String) {
        self.generation += 1;
        let generation = self.generation;
        let handle = PlaybackHandle::new(self.deps.playback.provider(), self.token.child_token());
        self.active = Some(ActivePlayback {
            generation,
            handle: handle.clone(),
        });

        let agent = self.agent.clone();
        let reasoning = self.deps.reasoning.clone();
        let playback = self.deps.playback.clone();
        let events = self.events.clone();
        let timeout = self.config.reasoning_timeout;

        let task = async move {
            let reply = tokio::select! {
                _ = handle.cancelled() => None,
                r = tokio::time::timeout(timeout, reasoning.process_query(&text, &agent)) => Some(match r {
                    Ok(reply) => reply,
                    Err(_) => {
                        warn!(?timeout, "reasoning timed out");
                        REASONING_TIMEOUT_REPLY.to_string()
                    }
                }),
            };

            if let Some(reply) = reply {
                info!(%reply, "agent replying");
                let sink = TurnSink {
                    generation,
                    events: events.clone(),
                };
                if let Err(e) = playback.generate_stream(&reply, &handle, &sink).await {
                    warn!(error = %e, "synthesis failed, resuming listening");
                }
            }
            handle.finish();
            let _ = events.send(SessionEvent::PlaybackFinished { generation });
        };
        tokio::spawn(task.instrument(Span::current()));
    }

    fn on_debounce(&mut self) -> VoiceResult<()> {
        self.debounce_at = None;
        self.apply(TurnInput::DebounceElapsed)
    }

    fn on_greeting(&mut self) -> VoiceResult<()> {
        self.greeting_at = None;
        let greeting = self.agent.initial_message.clone();
        self.apply(TurnInput::DirectInput(greeting))
    }

    /// Release everything. Safe to call more than once.
    fn shutdown(&mut self) {
        if self.turn.state() != TurnState::Stopped {
            // Transport went away without a stop event.
            if let Err(e) = self.apply(TurnInput::Stop) {
                debug!(error = %e, "cleanup after transport loss");
            }
        }
        self.frames = None;
        self.greeting_at = None;
        self.debounce_at = None;
        self.token.cancel();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Run one call to completion.
///
/// `inbound` carries parsed transport events; its closure means the connection dropped.
/// `outbound` is drained by the transport writer. Returns `Err(Transport)` only when the
/// writer side is gone.
pub async fn run_session(
    agent: AgentProfile,
    deps: SessionDeps,
    config: SessionConfig,
    mut inbound: mpsc::Receiver<InboundEvent>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
) -> VoiceResult<()> {
    let span = info_span!("call", agent_id = %agent.id, stream_sid = tracing::field::Empty);

    async move {
        info!(agent = %agent.name, provider = deps.playback.provider().as_str(), "call connected");
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (producer, source) = frame_queue(config.queue_capacity);
        let token = CancellationToken::new();

        let adapter = TranscriptionAdapter::new(deps.recognizer.clone(), config.poll_interval);
        let transcripts = events_tx.clone();
        let stt_token = token.clone();
        tokio::spawn(
            async move {
                let on_event = move |event: TranscriptEvent| {
                    let _ = transcripts.send(SessionEvent::Transcript(event));
                };
                tokio::select! {
                    _ = stt_token.cancelled() => {}
                    res = adapter.start_stream(source, on_event) => {
                        if let Err(e) = res {
                            debug!(error = %e, "transcription ended");
                        }
                    }
                }
            }
            .instrument(Span::current()),
        );

        let mut session = CallSession {
            agent: Arc::new(agent),
            deps,
            config,
            stream_sid: None,
            inbound_encoding: AudioEncoding::MuLaw,
            turn: TurnTaker::new(),
            debounce_at: None,
            greeting_at: None,
            generation: 0,
            active: None,
            frames: Some(producer),
            token,
            events: events_tx,
            outbound,
        };

        let result = loop {
            let step = tokio::select! {
                biased;
                Some(event) = events_rx.recv() => session.on_session_event(event),
                msg = inbound.recv() => match msg {
                    Some(event) => session.on_inbound(event),
                    None => {
                        info!("media socket closed");
                        break Ok(());
                    }
                },
                _ = sleep_until_opt(session.debounce_at) => session.on_debounce(),
                _ = sleep_until_opt(session.greeting_at) => session.on_greeting(),
            };
            if let Err(e) = step {
                break Err(e);
            }
            if session.turn.state() == TurnState::Stopped {
                break Ok(());
            }
        };

        session.shutdown();
        info!(turns = session.generation, "call ended");
        result
    }
    .instrument(span)
    .await
}
