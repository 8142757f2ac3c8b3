//! Inbound audio frames and the bounded single-producer/single-consumer queue that feeds
//! the transcription adapter.

use futures::stream::{self, Stream};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

/// Default queue capacity in frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    MuLaw,
    /// Signed 16-bit little-endian PCM.
    Linear16,
}

impl AudioEncoding {
    /// Map a transport media type (`audio/x-mulaw`, `audio/l16`, ...) to an encoding.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match base.as_str() {
            "audio/x-mulaw" | "audio/mulaw" | "audio/pcmu" | "audio/basic" => Some(Self::MuLaw),
            "audio/l16" | "audio/pcm" => Some(Self::Linear16),
            _ => None,
        }
    }
}

/// A chunk of raw samples in arrival order. No sequence numbers; position in the queue is the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub encoding: AudioEncoding,
    pub data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(encoding: AudioEncoding, data: Vec<u8>) -> Self {
        Self { encoding, data }
    }

    /// Samples as PCM16LE, transcoding μ-law if needed.
    pub fn into_pcm(self) -> Vec<u8> {
        match self.encoding {
            AudioEncoding::Linear16 => self.data,
            AudioEncoding::MuLaw => crate::codec::decode(&self.data),
        }
    }
}

/// Create a bounded frame queue.
pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameProducer { tx, dropped: 0 }, FrameSource { rx })
}

/// Write side, owned by the session loop.
pub struct FrameProducer {
    tx: mpsc::Sender<AudioFrame>,
    dropped: u64,
}

impl FrameProducer {
    /// Enqueue without waiting. When the queue is full the new frame is dropped; returns `false`.
    pub fn push(&mut self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, "frame queue full, dropping inbound frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("frame queue consumer gone");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Read side. Pull-based: polls on a fixed interval while empty, ends once the producer is dropped.
pub struct FrameSource {
    rx: mpsc::Receiver<AudioFrame>,
}

impl FrameSource {
    /// Next frame, or `None` once the producer is gone and the queue is drained.
    pub async fn next_frame(&mut self, poll_interval: Duration) -> Option<AudioFrame> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Empty) => tokio::time::sleep(poll_interval).await,
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Adapt into a stream of PCM16LE chunks for a recognizer.
    pub fn into_pcm_stream(self, poll_interval: Duration) -> impl Stream<Item = Vec<u8>> + Send + 'static {
        stream::unfold(self, move |mut source| async move {
            let frame = source.next_frame(poll_interval).await?;
            Some((frame.into_pcm(), source))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn full_queue_drops_newest() {
        let (mut producer, mut source) = frame_queue(2);
        assert!(producer.push(AudioFrame::new(AudioEncoding::Linear16, vec![1])));
        assert!(producer.push(AudioFrame::new(AudioEncoding::Linear16, vec![2])));
        assert!(!producer.push(AudioFrame::new(AudioEncoding::Linear16, vec![3])));
        assert_eq!(producer.dropped(), 1);
        drop(producer);

        let poll = Duration::from_millis(20);
        assert_eq!(source.next_frame(poll).await.map(|f| f.data), Some(vec![1]));
        assert_eq!(source.next_frame(poll).await.map(|f| f.data), Some(vec![2]));
        assert_eq!(source.next_frame(poll).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_waits_for_frames() {
        let (mut producer, source) = frame_queue(8);
        let handle = tokio::spawn(async move {
            source
                .into_pcm_stream(Duration::from_millis(20))
                .collect::<Vec<_>>()
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        producer.push(AudioFrame::new(AudioEncoding::MuLaw, vec![0xFF, 0xFF]));
        drop(producer);

        let chunks = handle.await.unwrap();
        assert_eq!(chunks, vec![vec![0, 0, 0, 0]]);
    }

    #[test]
    fn media_types_map_to_encodings() {
        assert_eq!(AudioEncoding::from_mime("audio/x-mulaw"), Some(AudioEncoding::MuLaw));
        assert_eq!(AudioEncoding::from_mime("audio/L16;rate=8000"), Some(AudioEncoding::Linear16));
        assert_eq!(AudioEncoding::from_mime("audio/opus"), None);
        assert_eq!(
            AudioFrame::new(AudioEncoding::Linear16, vec![1, 2]).into_pcm(),
            vec![1, 2]
        );
    }
}
