//! WebSocket transport to the relay.
//!
//! Connects to `ws(s)://host/ws/join/{local_id}`, sends outbound envelopes
//! from an unbounded queue, and surfaces inbound envelopes plus the final
//! close as [`RelayEvent`]s.

use futures_util::{SinkExt, StreamExt};
use signaling_proto::Envelope;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::NegotiationError;

#[derive(Debug)]
pub enum RelayEvent {
    Envelope(Envelope),
    /// The relay connection is gone; no further envelopes will arrive.
    Closed,
}

pub struct RelayClient {
    local_id: String,
    outbound: mpsc::UnboundedSender<Envelope>,
    events: AsyncMutex<Option<mpsc::UnboundedReceiver<RelayEvent>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl RelayClient {
    pub async fn connect(relay_url: &str, local_id: &str) -> Result<Self, NegotiationError> {
        let url = join_url(relay_url, local_id)?;
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|err| {
            NegotiationError::Signaling(format!("websocket connect failed: {err}"))
        })?;
        debug!(target: "signaling", url = %url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayEvent>();

        let writer = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                match envelope.encode() {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(target: "signaling", %err, "failed to encode envelope");
                    }
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => match Envelope::decode(&text) {
                        Ok(envelope) => {
                            if event_tx.send(RelayEvent::Envelope(envelope)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(target: "signaling", %err, "dropping malformed envelope");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(target: "signaling", %err, "relay websocket error");
                        break;
                    }
                }
            }
            let _ = event_tx.send(RelayEvent::Closed);
        });

        Ok(Self {
            local_id: local_id.to_string(),
            outbound: out_tx,
            events: AsyncMutex::new(Some(event_rx)),
            tasks: parking_lot::Mutex::new(vec![writer, reader]),
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Queue for outbound envelopes (destination in the `id` field).
    pub fn sender(&self) -> mpsc::UnboundedSender<Envelope> {
        self.outbound.clone()
    }

    /// Take the inbound event stream. Can only be taken once.
    pub async fn events(&self) -> Result<mpsc::UnboundedReceiver<RelayEvent>, NegotiationError> {
        self.events
            .lock()
            .await
            .take()
            .ok_or(NegotiationError::EventsTaken)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

fn join_url(relay_url: &str, local_id: &str) -> Result<Url, NegotiationError> {
    let mut url = Url::parse(relay_url).map_err(|err| {
        NegotiationError::Signaling(format!("invalid relay url {relay_url}: {err}"))
    })?;
    let mapped = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => {
            return Err(NegotiationError::Signaling(format!(
                "unsupported relay url scheme: {other}"
            )))
        }
    };
    if let Some(scheme) = mapped {
        url.set_scheme(scheme)
            .map_err(|_| NegotiationError::Signaling("invalid websocket scheme".into()))?;
    }
    url.set_path(&format!("/ws/join/{local_id}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
