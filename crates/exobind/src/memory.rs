//! # In-Memory Transport
//!
//! A duplex transport connecting two runtimes in the same process.
//!
//! Each endpoint owns a pump task that drains its inbound queue, hands
//! messages to listeners in arrival order and spawns a task per invoke
//! request. The pair must be created from within a tokio runtime.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::transport;
use crate::transport::Handler;
use crate::transport::Listener;
use crate::transport::Transport;

enum Frame {
    Message {
        channel: String,
        payload: Json,
    },
    Request {
        channel: String,
        payload: Json,
        reply: oneshot::Sender<transport::Result<Json>>,
    },
}

/// Listeners and responders installed on one endpoint.
#[derive(Default)]
struct Inbox {
    listeners: DashMap<String, Vec<Listener>>,
    handlers: DashMap<String, Handler>,
}

/// One end of an in-process duplex channel.
///
/// Messages sent on one endpoint reach the listeners of the other and vice
/// versa. Outbound messages are counted per channel so the wire can be
/// observed.
pub struct MemoryTransport {
    name: String,
    tx: mpsc::UnboundedSender<Frame>,
    inbox: Arc<Inbox>,
    sent: DashMap<String, usize>,
}

impl MemoryTransport {
    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        Self::pair_named("a", "b")
    }

    /// Creates a connected pair with names used in logs.
    pub fn pair_named(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self::endpoint(a.into(), tx_b, rx_a);
        let b = Self::endpoint(b.into(), tx_a, rx_b);
        (a, b)
    }

    fn endpoint(name: String, tx: mpsc::UnboundedSender<Frame>, rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        let inbox = Arc::new(Inbox::default());
        tokio::spawn(pump(name.clone(), rx, inbox.clone()));

        Self {
            name,
            tx,
            inbox,
            sent: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages and requests this endpoint has sent on `channel`.
    pub fn sent_count(&self, channel: &str) -> usize {
        self.sent.get(channel).map(|count| *count).unwrap_or(0)
    }

    fn record(&self, channel: &str) {
        *self.sent.entry(channel.to_string()).or_insert(0) += 1;
    }
}

async fn pump(name: String, mut rx: mpsc::UnboundedReceiver<Frame>, inbox: Arc<Inbox>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Message { channel, payload } => {
                // clone out so a listener may subscribe without deadlocking the map
                let listeners = inbox
                    .listeners
                    .get(&channel)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();

                if listeners.is_empty() {
                    tracing::trace!(endpoint = %name, %channel, "dropping message with no listener");
                }
                for listener in listeners {
                    listener(payload.clone());
                }
            }
            Frame::Request { channel, payload, reply } => {
                let handler = inbox.handlers.get(&channel).map(|entry| entry.value().clone());
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            // ignore if the requester gave up
                            let _ = reply.send(handler(payload).await);
                        });
                    }
                    None => {
                        let _ = reply.send(Err(transport::Error::NoHandler(channel)));
                    }
                }
            }
        }
    }

    tracing::debug!(endpoint = %name, "peer dropped, pump stopped");
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, channel: &str, payload: Json) -> transport::Result<()> {
        self.record(channel);
        self.tx
            .send(Frame::Message {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| transport::Error::ConnectionLost(format!("{}: peer closed", self.name)))
    }

    async fn invoke(&self, channel: &str, payload: Json) -> transport::Result<Json> {
        self.record(channel);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Frame::Request {
                channel: channel.to_string(),
                payload,
                reply,
            })
            .map_err(|_| transport::Error::ConnectionLost(format!("{}: peer closed", self.name)))?;

        rx.await
            .map_err(|_| transport::Error::ConnectionLost(format!("{}: reply dropped", self.name)))?
    }

    fn subscribe(&self, channel: &str, listener: Listener) {
        self.inbox
            .listeners
            .entry(channel.to_string())
            .or_default()
            .push(listener);
    }

    fn handle(&self, channel: &str, handler: Handler) -> transport::Result<()> {
        match self.inbox.handlers.entry(channel.to_string()) {
            Entry::Occupied(_) => Err(transport::Error::HandlerExists(channel.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    fn remove_handler(&self, channel: &str) -> bool {
        self.inbox.handlers.remove(channel).is_some()
    }
}
