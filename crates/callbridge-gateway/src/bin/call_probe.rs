//! Call probe: pretends to be the telephony side of a call against a running gateway.
//! Sends `start` and a `test_input`, counts the `media`/`clear` events that come back, then hangs up.
//!
//! Usage: cargo run --bin call-probe -- [agent_id] [text] [listen_secs]
//! Target: env `CALLBRIDGE_PROBE_URL` (default ws://127.0.0.1:8000)

use std::time::{Duration, Instant};

use anyhow::Context;
use callbridge_voice::{InboundEvent, OutboundEvent, StartMeta};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let agent_id = args.next().unwrap_or_else(|| "support".to_string());
    let text = args.next().unwrap_or_else(|| "Hello, what can you do?".to_string());
    let listen_secs: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    let base = std::env::var("CALLBRIDGE_PROBE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let url = format!("{}/media-stream/{}", base.trim_end_matches('/'), agent_id);
    println!("[PROBE] Dialing {}", url);

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let (mut tx, mut rx) = ws.split();

    let start = InboundEvent::Start {
        start: StartMeta {
            stream_sid: format!("MZprobe{}", std::process::id()),
            call_sid: None,
            media_format: None,
        },
    };
    tx.send(Message::Text(start.to_json()?)).await?;
    tx.send(Message::Text(InboundEvent::TestInput { text: text.clone() }.to_json()?))
        .await?;
    println!("[PROBE] Said: {:?}: listening {}s", text, listen_secs);

    let began = Instant::now();
    let mut media = 0usize;
    let mut audio_bytes = 0usize;
    let mut clears = 0usize;
    let mut first_media_ms = None;

    let listen = tokio::time::sleep(Duration::from_secs(listen_secs));
    tokio::pin!(listen);
    loop {
        tokio::select! {
            _ = &mut listen => break,
            msg = rx.next() => {
                let raw = match msg {
                    Some(Ok(Message::Text(raw))) => raw,
                    Some(Ok(Message::Close(_))) | None => {
                        println!("[PROBE] Gateway closed the stream (unknown agent?)");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        println!("[PROBE] Socket error: {}", e);
                        break;
                    }
                };
                match OutboundEvent::parse(&raw) {
                    Ok(OutboundEvent::Media { media: payload, .. }) => {
                        media += 1;
                        audio_bytes += payload.to_bytes().map(|b| b.len()).unwrap_or(0);
                        first_media_ms.get_or_insert(began.elapsed().as_millis());
                    }
                    Ok(OutboundEvent::Clear { .. }) => clears += 1,
                    Err(e) => println!("[PROBE] Unrecognized event: {}", e),
                }
            }
        }
    }

    let _ = tx.send(Message::Text(InboundEvent::Stop.to_json()?)).await;
    let _ = tx.close().await;

    // 8000 μ-law bytes per second of audio.
    println!(
        "[PROBE] media: {} ({:.1}s of audio) | clear: {} | first media after: {}",
        media,
        audio_bytes as f64 / 8000.0,
        clears,
        first_media_ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".into())
    );
    Ok(())
}
