//! JSON control protocol spoken on the media WebSocket (telephony media-stream dialect).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::VoiceResult;
use crate::frames::AudioEncoding;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid", default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(rename = "mediaFormat", default, skip_serializing_if = "Option::is_none")]
    pub media_format: Option<MediaFormat>,
}

impl StartMeta {
    /// Encoding of inbound `media` payloads. μ-law unless the transport announces L16.
    pub fn inbound_encoding(&self) -> AudioEncoding {
        self.media_format
            .as_ref()
            .and_then(|f| AudioEncoding::from_mime(&f.encoding))
            .unwrap_or(AudioEncoding::MuLaw)
    }
}

/// `start.mediaFormat`, e.g. `{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

/// Base64 audio carried in `media` events, both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl MediaPayload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(bytes),
        }
    }

    pub fn to_bytes(&self) -> VoiceResult<Vec<u8>> {
        Ok(STANDARD.decode(self.payload.as_bytes())?)
    }
}

/// Events the telephony side sends us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    Connected,
    Start { start: StartMeta },
    Media { media: MediaPayload },
    Stop,
    Mark,
    Dtmf,
    /// Debug-only: text injected as if the caller had said it.
    TestInput { text: String },
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn parse(raw: &str) -> VoiceResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events we send back to the telephony side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Flush whatever audio the far end still has buffered.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundEvent {
    pub fn media(stream_sid: &str, mulaw: &[u8]) -> Self {
        OutboundEvent::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaPayload::from_bytes(mulaw),
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutboundEvent::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, OutboundEvent::Clear { .. })
    }

    pub fn to_json(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(raw: &str) -> VoiceResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
