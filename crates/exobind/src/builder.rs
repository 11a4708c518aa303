//! # Runtime Builder
//!
//! Fluent configuration for a `Runtime` bound to one transport.

use std::sync::Arc;
use std::time::Duration;

use neowire::Restorer;

use crate::config::Config;
use crate::config::DEFAULT_BIND_TIMEOUT;
use crate::config::DEFAULT_RETRY_INTERVAL;
use crate::dispatch::FaultReport;
use crate::runtime::Runtime;
use crate::transport::Transport;

pub struct RuntimeBuilder {
    transport: Arc<dyn Transport>,
    side: String,
    peer: String,
    bind_timeout: Duration,
    retry_interval: Duration,
    callback_prefix: Option<String>,
    restorer: Option<Arc<dyn Restorer>>,
    on_fault: Option<crate::config::FaultHook>,
}

impl RuntimeBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            side: "local".to_string(),
            peer: "remote".to_string(),
            bind_timeout: DEFAULT_BIND_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            callback_prefix: None,
            restorer: None,
            on_fault: None,
        }
    }

    /// Names this process, e.g. `"main"`.
    pub fn side(mut self, side: impl Into<String>) -> Self {
        self.side = side.into();
        self
    }

    /// Names the process on the other end of the transport.
    pub fn peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Overrides the `exobind-callback-<side>` channel prefix.
    pub fn callback_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.callback_prefix = Some(prefix.into());
        self
    }

    /// Sets how class names received from the peer become instances.
    pub fn restorer(mut self, restorer: impl Restorer + 'static) -> Self {
        self.restorer = Some(Arc::new(restorer));
        self
    }

    /// Installs a hook receiving every fault that is not relayed to the caller.
    pub fn on_fault(mut self, hook: impl Fn(&FaultReport) + Send + Sync + 'static) -> Self {
        self.on_fault = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Runtime {
        let mut config = Config::new(self.side, self.peer, self.bind_timeout);
        config.retry_interval = self.retry_interval;
        if let Some(prefix) = self.callback_prefix {
            config.callback_prefix = prefix;
        }
        config.restorer = self.restorer;
        config.on_fault = self.on_fault;

        Runtime::from_parts(self.transport, config)
    }
}
