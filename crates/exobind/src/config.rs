//! # Runtime Configuration
//!
//! Labels, timing and restoration settings shared by every component of a
//! runtime. The bind timeout is the only setting that may change after
//! construction; it is read afresh on every retry check.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use neowire::Restorer;

use crate::dispatch::FaultReport;

/// Default time a bind waits for the peer to expose an API.
pub const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_millis(4000);

/// Default pause between discovery checks.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Receives every unrelayed fault raised by an exposed method.
pub type FaultHook = Arc<dyn Fn(&FaultReport) + Send + Sync>;

/// Settings of one runtime.
pub struct Config {
    /// Name of this process in logs and error messages.
    pub side: String,
    /// Name of the peer process in logs, error messages and relayed stacks.
    pub peer: String,
    pub retry_interval: Duration,
    pub callback_prefix: String,
    pub restorer: Option<Arc<dyn Restorer>>,
    pub on_fault: Option<FaultHook>,
    bind_timeout_ms: AtomicU64,
}

impl Config {
    pub(crate) fn new(side: String, peer: String, bind_timeout: Duration) -> Self {
        let callback_prefix = format!("exobind-callback-{}", side);
        Self {
            side,
            peer,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            callback_prefix,
            restorer: None,
            on_fault: None,
            bind_timeout_ms: AtomicU64::new(duration_ms(bind_timeout)),
        }
    }

    /// The current bind timeout.
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms.load(Ordering::Relaxed))
    }

    /// Changes the bind timeout, including for binds already waiting.
    pub fn set_bind_timeout(&self, timeout: Duration) {
        self.bind_timeout_ms.store(duration_ms(timeout), Ordering::Relaxed);
    }

    pub(crate) fn restorer(&self) -> Option<&dyn Restorer> {
        self.restorer.as_deref()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
