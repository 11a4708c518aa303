//! # Call Dispatcher
//!
//! The exposing side of a call. One handler is installed per method, on the
//! channel `"<Api>:<method>"`. Each handler restores the arguments, runs the
//! method and marshals what comes out.
//!
//! ## Invariants
//!
//! - A normal return becomes `[value, info]`.
//! - A `Fault::Relay` becomes a relayed `[value, info]` reply.
//! - A `Fault::Internal`, or a reply that cannot be marshaled, is a fault of
//!   this process: it is logged, handed to the fault hook, and the caller only
//!   learns that the call failed.

use std::sync::Arc;

use futures::FutureExt;
use neowire::CallEnvelope;
use neowire::Value;
use serde_json::Value as Json;

use crate::api::Args;
use crate::api::Fault;
use crate::api::Method;
use crate::callback::CallbackRelay;
use crate::config::Config;
use crate::transport;
use crate::transport::Handler;

/// An unrelayed fault raised while serving a call.
#[derive(Debug)]
pub struct FaultReport {
    pub wire_name: String,
    pub error: anyhow::Error,
}

pub(crate) struct Dispatcher {
    config: Arc<Config>,
    relay: Arc<CallbackRelay>,
}

impl Dispatcher {
    pub(crate) fn new(config: Arc<Config>, relay: Arc<CallbackRelay>) -> Self {
        Self { config, relay }
    }

    /// Wraps a method into a transport handler.
    pub(crate) fn handler(self: &Arc<Self>, wire_name: String, method: Method) -> Handler {
        let dispatcher = self.clone();
        Arc::new(move |payload| {
            let dispatcher = dispatcher.clone();
            let wire_name = wire_name.clone();
            let method = method.clone();
            async move { dispatcher.dispatch(&wire_name, &method, payload).await }.boxed()
        })
    }

    async fn dispatch(&self, wire_name: &str, method: &Method, payload: Json) -> transport::Result<Json> {
        let envelope = CallEnvelope::from_json(payload).map_err(|e| self.fault(wire_name, e.into()))?;
        let restored = neowire::restore_args(envelope, self.config.restorer());

        let mut values = restored.values;
        for (index, channel) in restored.callback_channels {
            if let Some(slot) = values.get_mut(index) {
                *slot = Value::Callback(self.relay.stand_in(channel));
            }
        }

        tracing::trace!(side = %self.config.side, %wire_name, args = values.len(), "dispatching call");

        let reply = match method(Args::new(values)).await {
            Ok(value) => neowire::marshal_return(value),
            Err(Fault::Relay(thrown)) => {
                tracing::debug!(side = %self.config.side, %wire_name, "relaying thrown value to caller");
                neowire::make_rethrown_return_value(thrown)
            }
            Err(Fault::Internal(error)) => return Err(self.fault(wire_name, error)),
        };

        reply
            .and_then(|reply| reply.to_json())
            .map_err(|e| self.fault(wire_name, e.into()))
    }

    fn fault(&self, wire_name: &str, error: anyhow::Error) -> transport::Error {
        tracing::error!(side = %self.config.side, %wire_name, error = %format!("{:#}", error), "unrelayed fault in exposed method");

        if let Some(hook) = &self.config.on_fault {
            hook(&FaultReport {
                wire_name: wire_name.to_string(),
                error,
            });
        }

        transport::Error::Remote(format!("{} failed in the {} process", wire_name, self.config.side))
    }
}
