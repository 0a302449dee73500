//! WebSocket client side of the sync bridge.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;

use kibble_daemon::bridge::{ClientMessage, DaemonMessage};

#[derive(Debug)]
pub enum BridgeEvent {
    Message(DaemonMessage),
    Disconnected,
}

/// One live connection to the daemon. Reader and writer run as
/// detached tasks feeding a channel the caller owns, so the overlay's
/// tick loop never blocks on the socket and the event stream survives
/// reconnects.
pub struct BridgeClient {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
}

impl BridgeClient {
    pub async fn connect(url: &str, events: mpsc::UnboundedSender<BridgeEvent>) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to reach daemon bridge at {url}"))?;
        let (mut writer, mut reader) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let Ok(payload) = serde_json::to_string(&message) else {
                    continue;
                };
                if writer.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<DaemonMessage>(&text) {
                        Ok(message) => {
                            if events.send(BridgeEvent::Message(message)).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(?err, "Unreadable daemon payload {text}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(?err, "Bridge read error");
                        break;
                    }
                }
            }
            let _ = events.send(BridgeEvent::Disconnected);
        });

        Ok(Self { outgoing })
    }

    /// Queue a message for the daemon. A dead writer task surfaces as
    /// a `Disconnected` event, not an error here.
    pub fn send(&self, message: ClientMessage) {
        let _ = self.outgoing.send(message);
    }
}
