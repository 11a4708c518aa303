//! # Binding Protocol
//!
//! Resolves an API name into a registration exposed by the peer.
//!
//! ## Protocol
//!
//! - The binder sends the API name on `api-discovery-request`.
//! - The peer answers on `api-discovery-response` with the registration if it
//!   has one. It also announces every API on that channel the moment it is
//!   exposed, so a request sent too early is answered later.
//! - Responses are broadcast and recorded in the `RemoteDirectory`; the
//!   binder polls the directory at a fixed interval until the entry shows up
//!   or the bind timeout elapses.
//!
//! ## States
//!
//! `Unbound -> Discovering -> Bound`, or `Discovering -> timed out`. A timed
//! out attempt leaves the name `Unbound`; a later bind starts over.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use serde_json::Value as Json;
use tokio::time::Instant;

use crate::config::Config;
use crate::registry::ApiRegistration;
use crate::registry::LocalRegistry;
use crate::registry::RemoteDirectory;
use crate::transport;
use crate::transport::Transport;

/// Channel carrying discovery requests (payload: the API name).
pub const DISCOVERY_REQUEST: &str = "api-discovery-request";

/// Channel carrying discovery responses (payload: an `ApiRegistration`).
pub const DISCOVERY_RESPONSE: &str = "api-discovery-response";

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The peer did not expose the API before the deadline.
    #[error(
        "timed out after {}ms binding API '{api}': the {peer} process did not expose it in time (requested by the {side} process)",
        timeout.as_millis()
    )]
    Timeout {
        api: String,
        side: String,
        peer: String,
        timeout: Duration,
    },
    /// The discovery request could not be sent.
    #[error("failed to request API '{api}': {source}")]
    Transport { api: String, source: transport::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a name stands in the binding state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Discovering,
    Bound,
}

/// Subscribes the two discovery channels on a fresh transport.
///
/// Requests are answered from `local`; responses are recorded in `remote`.
pub(crate) fn install_discovery(
    transport: &Arc<dyn Transport>,
    local: Arc<LocalRegistry>,
    remote: Arc<RemoteDirectory>,
    config: Arc<Config>,
) {
    let responder: Weak<dyn Transport> = Arc::downgrade(transport);
    let side = config.side.clone();

    transport.subscribe(
        DISCOVERY_REQUEST,
        Arc::new(move |payload| {
            let api = match payload {
                Json::String(api) => api,
                other => {
                    tracing::warn!(side = %side, payload = %other, "ignoring malformed discovery request");
                    return;
                }
            };

            let Some(registration) = local.get(&api) else {
                tracing::trace!(side = %side, %api, "discovery request for an API not exposed yet");
                return;
            };

            let Some(transport) = responder.upgrade() else {
                return;
            };

            let side = side.clone();
            tokio::spawn(async move {
                if let Err(e) = announce(transport.as_ref(), &registration).await {
                    tracing::warn!(side = %side, api = %registration.api_name, error = %e, "failed to answer discovery request");
                }
            });
        }),
    );

    let side = config.side.clone();
    transport.subscribe(
        DISCOVERY_RESPONSE,
        Arc::new(move |payload| match serde_json::from_value::<ApiRegistration>(payload) {
            Ok(registration) => {
                let api = registration.api_name.clone();
                if remote.record(registration) {
                    tracing::debug!(side = %side, %api, "peer announced API");
                }
            }
            Err(e) => tracing::warn!(side = %side, error = %e, "ignoring malformed discovery response"),
        }),
    );
}

/// Broadcasts a registration to the peer.
pub(crate) async fn announce(transport: &dyn Transport, registration: &ApiRegistration) -> transport::Result<()> {
    let payload = serde_json::to_value(registration).map_err(|e| transport::Error::Io(e.to_string()))?;
    transport.send(DISCOVERY_RESPONSE, payload).await
}

/// Waits until the peer has announced `api`, or fails after the bind timeout.
///
/// The timeout is re-read on every check, so changing it affects attempts
/// that are already waiting.
pub(crate) async fn discover(
    transport: &dyn Transport,
    remote: &RemoteDirectory,
    config: &Config,
    api: &str,
) -> Result<ApiRegistration> {
    if let Some(registration) = remote.get(api) {
        return Ok(registration);
    }

    tracing::debug!(side = %config.side, %api, "requesting API from peer");
    transport
        .send(DISCOVERY_REQUEST, Json::String(api.to_string()))
        .await
        .map_err(|source| Error::Transport {
            api: api.to_string(),
            source,
        })?;

    let started = Instant::now();
    loop {
        if let Some(registration) = remote.get(api) {
            return Ok(registration);
        }

        let timeout = config.bind_timeout();
        if started.elapsed() >= timeout {
            tracing::warn!(side = %config.side, %api, timeout_ms = timeout.as_millis() as u64, "bind timed out");
            return Err(Error::Timeout {
                api: api.to_string(),
                side: config.side.clone(),
                peer: config.peer.clone(),
                timeout,
            });
        }

        tokio::time::sleep(config.retry_interval).await;
    }
}
