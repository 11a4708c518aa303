//! # Remote API Proxy
//!
//! The calling side of a bound API. A proxy forwards each call over the
//! transport and restores what comes back.
//!
//! ## Invariants
//!
//! - Only methods listed in the peer's registration are forwarded.
//! - Callback arguments are subscribed before the call is sent.
//! - A relayed throw surfaces as `CallError::Relayed`, never as a value.
//! - There is no timeout on an in-flight call; it waits as long as the
//!   transport does.

use std::sync::Arc;

use neowire::Reply;
use neowire::Thrown;
use neowire::Value;
use serde::de::DeserializeOwned;

use crate::callback::CallbackRelay;
use crate::config::Config;
use crate::registry::ApiRegistration;
use crate::registry::wire_name;
use crate::transport;
use crate::transport::Transport;

/// Errors during a remote call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote registration does not list this method.
    #[error("API '{api}' has no method '{method}'")]
    UnknownMethod { api: String, method: String },
    /// The method deliberately relayed a thrown value.
    #[error("{wire_name} threw {thrown}")]
    Relayed { wire_name: String, thrown: Thrown },
    /// The call could not be delivered or answered.
    #[error("transport failure: {0}")]
    Transport(#[from] transport::Error),
    /// Marshaling or unmarshaling failed.
    #[error("wire format error: {0}")]
    Wire(#[from] neowire::Error),
    /// The result did not deserialize into the requested type.
    #[error("result of {wire_name} has an unexpected shape: {reason}")]
    Decode { wire_name: String, reason: String },
}

impl CallError {
    /// The relayed value, if this error is a relayed throw.
    pub fn thrown(&self) -> Option<&Thrown> {
        match self {
            CallError::Relayed { thrown, .. } => Some(thrown),
            _ => None,
        }
    }
}

/// What a proxy needs to place calls.
pub(crate) struct CallContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: Arc<Config>,
    pub(crate) relay: Arc<CallbackRelay>,
}

/// A callable stand-in for an API exposed by the peer.
pub struct ApiProxy {
    registration: ApiRegistration,
    ctx: Arc<CallContext>,
}

impl ApiProxy {
    pub(crate) fn new(registration: ApiRegistration, ctx: Arc<CallContext>) -> Self {
        Self { registration, ctx }
    }

    pub fn name(&self) -> &str {
        &self.registration.api_name
    }

    pub fn methods(&self) -> &[String] {
        &self.registration.method_names
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.registration.has_method(method)
    }

    /// Calls a remote method and restores its result.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        if !self.has_method(method) {
            return Err(CallError::UnknownMethod {
                api: self.name().to_string(),
                method: method.to_string(),
            });
        }

        let wire_name = wire_name(self.name(), method);
        let relay = &self.ctx.relay;

        let prepared = neowire::prepare_args_for_transfer(args, || relay.allocate())?;
        for (channel, callback) in prepared.callbacks {
            relay.listen(&channel, callback);
        }

        tracing::trace!(side = %self.ctx.config.side, %wire_name, "invoking remote method");
        let response = self
            .ctx
            .transport
            .invoke(&wire_name, prepared.envelope.to_json()?)
            .await?;

        let Reply(value, info) = Reply::from_json(response)?;
        let restorer = self.ctx.config.restorer();

        if neowire::was_thrown_value(&value) {
            let origin = format!("{} ({} process)", wire_name, self.ctx.config.peer);
            let thrown = neowire::restore_thrown_value(value, info.as_ref(), restorer, &origin);
            tracing::debug!(side = %self.ctx.config.side, %wire_name, thrown = %thrown, "remote method threw");
            return Err(CallError::Relayed { wire_name, thrown });
        }

        Ok(neowire::restore_value(value, info.as_ref(), restorer))
    }

    /// Calls a remote method and deserializes its result into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T, CallError> {
        let json = match self.call(method, args).await? {
            Value::Data(json) => json,
            Value::Instance(instance) => instance.to_json()?,
            other => {
                return Err(CallError::Decode {
                    wire_name: wire_name(self.name(), method),
                    reason: format!("not plain data: {:?}", other),
                });
            }
        };

        serde_json::from_value(json).map_err(|e| CallError::Decode {
            wire_name: wire_name(self.name(), method),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for ApiProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiProxy")
            .field("api", &self.registration.api_name)
            .field("methods", &self.registration.method_names)
            .finish()
    }
}
