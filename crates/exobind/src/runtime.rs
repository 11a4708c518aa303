//! # Runtime Context
//!
//! One `Runtime` per transport connection. It owns every piece of per-process
//! state the protocol needs: the APIs this side exposes, the registrations the
//! peer has announced, the proxies bound so far, the binds in flight and the
//! callback relay.
//!
//! ## Invariants
//!
//! - A bound proxy is cached for the life of the runtime and never re-queried.
//! - Concurrent binds for the same name share one discovery attempt, so only
//!   one request goes out and all callers receive the same proxy.
//! - A failed attempt is forgotten; the next bind starts a fresh one.
//!
//! All maps are `DashMap`s, so a `Runtime` may be cloned freely and used from
//! any task.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;

use crate::api::Api;
use crate::api::ExposedApi;
use crate::api::Method;
use crate::bind;
use crate::bind::BindState;
use crate::builder::RuntimeBuilder;
use crate::callback::CallbackRelay;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::proxy::ApiProxy;
use crate::proxy::CallContext;
use crate::registry::ApiRegistration;
use crate::registry::Claim;
use crate::registry::ExposeError;
use crate::registry::LocalRegistry;
use crate::registry::RemoteDirectory;
use crate::registry::validate_api_name;
use crate::registry::wire_name;
use crate::transport::Transport;

type BindAttempt = Shared<BoxFuture<'static, bind::Result<Arc<ApiProxy>>>>;

struct Inner {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    local: Arc<LocalRegistry>,
    remote: Arc<RemoteDirectory>,
    bound: DashMap<String, Arc<ApiProxy>>,
    discovering: DashMap<String, BindAttempt>,
    calls: Arc<CallContext>,
    dispatcher: Arc<Dispatcher>,
    relay: Arc<CallbackRelay>,
}

/// The exposing and binding context of one side of a connection.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    pub fn builder(transport: Arc<dyn Transport>) -> RuntimeBuilder {
        RuntimeBuilder::new(transport)
    }

    /// Creates a runtime with default settings.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        RuntimeBuilder::new(transport).build()
    }

    pub(crate) fn from_parts(transport: Arc<dyn Transport>, config: Config) -> Self {
        let config = Arc::new(config);
        let local = Arc::new(LocalRegistry::default());
        let remote = Arc::new(RemoteDirectory::default());

        bind::install_discovery(&transport, local.clone(), remote.clone(), config.clone());

        let relay = Arc::new(CallbackRelay::new(config.callback_prefix.clone(), &transport));
        let dispatcher = Arc::new(Dispatcher::new(config.clone(), relay.clone()));
        let calls = Arc::new(CallContext {
            transport: transport.clone(),
            config: config.clone(),
            relay: relay.clone(),
        });

        tracing::debug!(side = %config.side, peer = %config.peer, "runtime started");

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                local,
                remote,
                bound: DashMap::new(),
                discovering: DashMap::new(),
                calls,
                dispatcher,
                relay,
            }),
        }
    }

    pub fn side(&self) -> &str {
        &self.inner.config.side
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn bind_timeout(&self) -> Duration {
        self.inner.config.bind_timeout()
    }

    /// Changes the bind timeout. Binds already waiting observe the new value
    /// on their next check.
    pub fn set_bind_timeout(&self, timeout: Duration) {
        tracing::debug!(side = %self.side(), timeout_ms = timeout.as_millis() as u64, "bind timeout changed");
        self.inner.config.set_bind_timeout(timeout);
    }

    /// Exposes an API to the peer.
    ///
    /// Exposing the same owner type under the same name again does nothing.
    pub async fn expose(&self, api: ExposedApi) -> Result<(), ExposeError> {
        validate_api_name(&api.name)?;

        let inner = &self.inner;
        let registration = ApiRegistration {
            api_name: api.name.clone(),
            method_names: api.method_names(),
        };

        let ExposedApi {
            name,
            owner,
            owner_name,
            methods,
        } = api;

        let claim = inner
            .local
            .register(registration.clone(), owner, owner_name, || inner.install_handlers(&name, methods))?;

        if claim == Claim::Existing {
            tracing::debug!(side = %self.side(), api = %name, "API already exposed");
            return Ok(());
        }
        tracing::info!(side = %self.side(), api = %name, methods = registration.method_names.len(), "exposed API");

        if let Err(e) = bind::announce(inner.transport.as_ref(), &registration).await {
            tracing::warn!(side = %self.side(), api = %name, error = %e, "failed to announce API");
        }
        Ok(())
    }

    /// Exposes a type describing its own API.
    pub async fn expose_api<A: Api>(&self, api: Arc<A>) -> Result<(), ExposeError> {
        self.expose(api.into_exposed()).await
    }

    /// Resolves an API exposed by the peer into a callable proxy.
    pub async fn bind(&self, api: &str) -> bind::Result<Arc<ApiProxy>> {
        if let Some(proxy) = self.inner.bound.get(api) {
            return Ok(proxy.value().clone());
        }

        let attempt = match self.inner.discovering.entry(api.to_string()) {
            Entry::Occupied(attempt) => attempt.get().clone(),
            Entry::Vacant(slot) => {
                let inner = self.inner.clone();
                let name = api.to_string();
                let attempt = async move { inner.resolve(name).await }.boxed().shared();
                slot.insert(attempt.clone());
                attempt
            }
        };

        attempt.await
    }

    pub fn bind_state(&self, api: &str) -> BindState {
        if self.inner.bound.contains_key(api) {
            BindState::Bound
        } else if self.inner.discovering.contains_key(api) {
            BindState::Discovering
        } else {
            BindState::Unbound
        }
    }

    /// Registration of an API this side has exposed.
    pub fn exposed(&self, api: &str) -> Option<ApiRegistration> {
        self.inner.local.get(api)
    }

    /// Number of callback channels this side has subscribed. Never decreases.
    pub fn callback_channels(&self) -> usize {
        self.inner.relay.live_channels()
    }
}

impl Inner {
    /// Installs one handler per method. On failure the handlers installed so
    /// far are removed again.
    fn install_handlers(&self, api: &str, methods: Vec<(String, Method)>) -> Result<(), ExposeError> {
        let mut installed: Vec<String> = Vec::with_capacity(methods.len());

        for (method, handler) in methods {
            let wire_name = wire_name(api, &method);
            let handler = self.dispatcher.handler(wire_name.clone(), handler);

            if let Err(e) = self.transport.handle(&wire_name, handler) {
                for wire_name in &installed {
                    self.transport.remove_handler(wire_name);
                }
                tracing::warn!(side = %self.config.side, %api, %wire_name, error = %e, "rolled back partially exposed API");
                return Err(e.into());
            }
            installed.push(wire_name);
        }
        Ok(())
    }

    async fn resolve(self: Arc<Self>, api: String) -> bind::Result<Arc<ApiProxy>> {
        let result = self.discover_and_cache(&api).await;
        self.discovering.remove(&api);
        result
    }

    async fn discover_and_cache(&self, api: &str) -> bind::Result<Arc<ApiProxy>> {
        if let Some(proxy) = self.bound.get(api) {
            return Ok(proxy.value().clone());
        }

        let registration = bind::discover(self.transport.as_ref(), &self.remote, &self.config, api).await?;

        let proxy = self
            .bound
            .entry(api.to_string())
            .or_insert_with(|| Arc::new(ApiProxy::new(registration, self.calls.clone())))
            .value()
            .clone();

        tracing::info!(side = %self.config.side, %api, methods = proxy.methods().len(), "bound API");
        Ok(proxy)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("side", &self.inner.config.side)
            .field("peer", &self.inner.config.peer)
            .field("exposed", &self.inner.local.len())
            .field("bound", &self.inner.bound.len())
            .finish()
    }
}
