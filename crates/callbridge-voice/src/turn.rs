//! Turn-taking for a phone call
//!
//! Decides when the caller has finished a turn (final fragments followed by a debounce window
//! of silence) and when the caller is talking over the agent (barge-in). The machine is pure:
//! it consumes [`TurnInput`]s and returns the [`TurnAction`]s the session loop must carry out,
//! in order. Timers and playback live in the loop.

use tracing::{debug, info};

use crate::stt::TranscriptEvent;

/// Utterances shorter than this (trimmed, in chars) are dropped instead of answered.
const MIN_UTTERANCE_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for the stream to start.
    Idle,
    Listening,
    /// Agent audio is being produced.
    Speaking,
    /// Barge-in in progress: playback cancellation and clear issued, not yet listening.
    Interrupting,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Start,
    Transcript(TranscriptEvent),
    DebounceElapsed,
    /// Bypasses the buffer and the debounce timer (greeting, debug input).
    DirectInput(String),
    PlaybackFinished,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    CancelPlayback,
    ClearDownstream,
    /// Arm (or re-arm, replacing) the debounce timer.
    ArmDebounce,
    CancelDebounce,
    /// Run reasoning on the text and play the reply.
    Respond(String),
}

/// Per-call turn-taking state.
#[derive(Debug)]
pub struct TurnTaker {
    state: TurnState,
    utterance: Vec<String>,
}

impl Default for TurnTaker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTaker {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            utterance: Vec::new(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Text buffered since the last flush, space-joined.
    pub fn pending_utterance(&self) -> String {
        self.utterance.join(" ")
    }

    pub fn handle(&mut self, input: TurnInput) -> Vec<TurnAction> {
        if self.state == TurnState::Stopped {
            return Vec::new();
        }
        if let TurnInput::Stop = input {
            self.state = TurnState::Stopped;
            self.utterance.clear();
            return vec![TurnAction::CancelDebounce, TurnAction::CancelPlayback];
        }
        if self.state == TurnState::Idle {
            return match input {
                TurnInput::Start => {
                    self.state = TurnState::Listening;
                    Vec::new()
                }
                // Debug input is answered whether or not the stream has started.
                TurnInput::DirectInput(text) => self.direct(text),
                other => {
                    debug!(input = ?other, "ignoring input before stream start");
                    Vec::new()
                }
            };
        }

        match input {
            TurnInput::Start | TurnInput::Stop => Vec::new(),
            TurnInput::Transcript(event) => self.on_transcript(event),
            TurnInput::DebounceElapsed => self.flush(),
            TurnInput::DirectInput(text) => self.direct(text),
            TurnInput::PlaybackFinished => {
                if self.state != TurnState::Speaking {
                    return Vec::new();
                }
                self.state = TurnState::Listening;
                // Fragments that arrived while speaking still deserve an answer.
                if self.utterance.is_empty() {
                    Vec::new()
                } else {
                    vec![TurnAction::ArmDebounce]
                }
            }
        }
    }

    /// Leave `Interrupting` once the loop has executed the barge-in actions.
    pub fn resume_listening(&mut self) {
        if self.state == TurnState::Interrupting {
            self.state = TurnState::Listening;
        }
    }

    fn barge_in(&mut self) -> Vec<TurnAction> {
        info!("barge-in: caller speaking over agent");
        self.state = TurnState::Interrupting;
        vec![
            TurnAction::CancelPlayback,
            TurnAction::ClearDownstream,
            TurnAction::CancelDebounce,
        ]
    }

    fn on_transcript(&mut self, event: TranscriptEvent) -> Vec<TurnAction> {
        if event.is_partial {
            return if self.state == TurnState::Speaking {
                self.barge_in()
            } else {
                vec![TurnAction::CancelDebounce]
            };
        }

        // A final while speaking is buffered; it is answered once playback finishes.
        let fragment = event.text.trim();
        if !fragment.is_empty() {
            self.utterance.push(fragment.to_string());
        }
        vec![TurnAction::ArmDebounce]
    }

    fn flush(&mut self) -> Vec<TurnAction> {
        if self.state != TurnState::Listening || self.utterance.is_empty() {
            return Vec::new();
        }
        let text = self.utterance.join(" ").trim().to_string();
        self.utterance.clear();
        if text.chars().count() < MIN_UTTERANCE_CHARS {
            debug!(%text, "discarding short utterance");
            return Vec::new();
        }
        info!(%text, "utterance flushed");
        self.state = TurnState::Speaking;
        vec![TurnAction::Respond(text)]
    }

    fn direct(&mut self, text: String) -> Vec<TurnAction> {
        let text = text.trim().to_string();
        if text.chars().count() < MIN_UTTERANCE_CHARS {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if self.state == TurnState::Speaking {
            actions.push(TurnAction::CancelPlayback);
            actions.push(TurnAction::ClearDownstream);
        }
        self.state = TurnState::Speaking;
        actions.push(TurnAction::Respond(text));
        actions
    }
}
