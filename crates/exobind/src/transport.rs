//! # Transport Abstraction
//!
//! A minimal, async interface for moving JSON-like messages between two
//! processes over named channels.
//!
//! ## Philosophy
//!
//! - **Channel-Oriented**: The Transport knows nothing about APIs, proxies or
//!   restoration. It moves opaque `serde_json::Value` payloads.
//! - **Two Roles**: fire-and-forget `send` delivered to `subscribe` listeners,
//!   and request/response `invoke` answered by the single `handle` responder
//!   of a channel.
//! - **No Lifecycle**: Connecting, reconnecting and tearing down belong to
//!   whoever constructs the transport.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value as Json;

/// Errors that occur at the channel layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// Nobody answers invoke requests on this channel.
    #[error("no handler registered for channel '{0}'")]
    NoHandler(String),
    /// A responder is already installed for this channel.
    #[error("a handler is already registered for channel '{0}'")]
    HandlerExists(String),
    /// The remote responder failed without producing a reply.
    #[error("remote handler failed: {0}")]
    Remote(String),
    /// Generic I/O error or internal transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Receives fire-and-forget messages sent to a channel.
pub type Listener = Arc<dyn Fn(Json) + Send + Sync>;

/// Answers invoke requests made on a channel.
pub type Handler = Arc<dyn Fn(Json) -> BoxFuture<'static, Result<Json>> + Send + Sync>;

/// A bidirectional message channel to one peer process.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a message to the peer's listeners on `channel`.
    ///
    /// A message sent to a channel nobody listens on is dropped.
    async fn send(&self, channel: &str, payload: Json) -> Result<()>;

    /// Sends a request to the peer's responder on `channel` and awaits its reply.
    async fn invoke(&self, channel: &str, payload: Json) -> Result<Json>;

    /// Adds a listener for messages the peer sends on `channel`.
    fn subscribe(&self, channel: &str, listener: Listener);

    /// Installs the responder for requests the peer invokes on `channel`.
    fn handle(&self, channel: &str, handler: Handler) -> Result<()>;

    /// Removes the responder for `channel`. Returns whether one was installed.
    fn remove_handler(&self, channel: &str) -> bool;
}
