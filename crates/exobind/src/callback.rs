//! # Callback Relay
//!
//! Lets a function passed as an argument be called from the other side.
//!
//! The caller allocates a channel `<prefix>_<n>` per function argument and
//! listens on it; invocations arriving there run the original function in
//! arrival order. The callee gets a stand-in `Callback` that sends its
//! argument list to that channel.
//!
//! Channels are never released. There is no teardown message, so every
//! function ever passed keeps its subscription for the life of the transport.
//! `live_channels` makes that growth observable.
//!
//! The relay only holds the transport weakly: handlers installed on the
//! transport reach the relay, so a strong reference would keep both alive.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use futures::future::BoxFuture;
use neowire::Callback;
use neowire::CallbackTarget;
use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::transport::Transport;

pub(crate) struct CallbackRelay {
    prefix: String,
    counter: AtomicU64,
    live: AtomicUsize,
    transport: Weak<dyn Transport>,
}

impl CallbackRelay {
    pub(crate) fn new(prefix: String, transport: &Arc<dyn Transport>) -> Self {
        Self {
            prefix,
            counter: AtomicU64::new(1),
            live: AtomicUsize::new(0),
            transport: Arc::downgrade(transport),
        }
    }

    /// Allocates a fresh channel name.
    pub(crate) fn allocate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", self.prefix, n)
    }

    /// Routes invocations arriving on `channel` to `callback`.
    pub(crate) fn listen(&self, channel: &str, callback: Callback) {
        let Some(transport) = self.transport.upgrade() else {
            tracing::warn!(channel, "transport closed, callback will never fire");
            return;
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Json>>();

        let name = channel.to_string();
        tokio::spawn(async move {
            while let Some(args) = rx.recv().await {
                if let Err(e) = callback.call(args).await {
                    tracing::warn!(channel = %name, error = %e, "callback invocation failed");
                }
            }
        });

        transport.subscribe(
            channel,
            Arc::new(move |payload| {
                let args = match payload {
                    Json::Array(args) => args,
                    other => vec![other],
                };
                // the receiver lives as long as the subscription
                let _ = tx.send(args);
            }),
        );

        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(channel, live, "callback channel opened");
    }

    /// Builds the local stand-in for a callback living on the other side.
    pub(crate) fn stand_in(&self, channel: String) -> Callback {
        Callback::from_target(Arc::new(RemoteCallback {
            channel,
            transport: self.transport.clone(),
        }))
    }

    pub(crate) fn live_channels(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

/// Sends invocations to a callback channel on the peer.
struct RemoteCallback {
    channel: String,
    transport: Weak<dyn Transport>,
}

impl CallbackTarget for RemoteCallback {
    fn invoke(&self, args: Vec<Json>) -> BoxFuture<'static, neowire::Result<()>> {
        let transport = self.transport.upgrade();
        let channel = self.channel.clone();
        async move {
            let Some(transport) = transport else {
                return Err(neowire::Error::Callback(format!("transport for {} is closed", channel)));
            };
            transport
                .send(&channel, Json::Array(args))
                .await
                .map_err(|e| neowire::Error::Callback(e.to_string()))
        }
        .boxed()
    }

    fn channel(&self) -> Option<&str> {
        Some(&self.channel)
    }
}
