//! # Callbridge Voice - per-call session orchestration
//!
//! Bridges a telephony media stream (8 kHz μ-law over WebSocket) with streaming transcription,
//! reasoning and speech synthesis for one live conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Session Orchestrator                        │
//! │  ┌────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────┐ │
//! │  │ media in   │ → │ μ-law→PCM  │ → │ frame queue │ → │   STT    │ │
//! │  │ (base64)   │   │  (codec)   │   │  (bounded)  │   │ adapter  │ │
//! │  └────────────┘   └────────────┘   └─────────────┘   └────┬─────┘ │
//! │                                                            ↓       │
//! │  ┌────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────┐ │
//! │  │ media out  │ ← │  playback  │ ← │  reasoning  │ ← │   turn   │ │
//! │  │  / clear   │   │ (batch|dup)│   │             │   │  taker   │ │
//! │  └────────────┘   └────────────┘   └─────────────┘   └──────────┘ │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod error;
pub mod frames;
pub mod orchestrator;
pub mod playback;
pub mod protocol;
pub mod resample;
pub mod stt;
pub mod turn;

pub use error::{VoiceError, VoiceResult};
pub use frames::{frame_queue, AudioEncoding, AudioFrame, FrameProducer, FrameSource};
pub use orchestrator::{run_session, SessionConfig, SessionDeps, REASONING_TIMEOUT_REPLY};
pub use playback::{
    controller_for, BatchPlayback, BatchSynthesisConfig, DuplexPlayback, DuplexSynthesisConfig, MediaSink,
    PlaybackController, PlaybackHandle, PlaybackState, SynthesisConfig,
};
pub use protocol::{InboundEvent, MediaFormat, MediaPayload, OutboundEvent, StartMeta};
pub use stt::{
    RecognizerConfig, RecognizerError, StreamingRecognizer, TranscriptEvent, TranscriptionAdapter, WsRecognizer,
};
pub use turn::{TurnAction, TurnInput, TurnState, TurnTaker};
