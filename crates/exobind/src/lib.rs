//! # ExoBind
//!
//! Expose plain-method APIs to a peer process and call the peer's APIs as if
//! they were local.
//!
//! ## Architecture
//!
//! - **Transport**: an async `send`/`invoke`/`subscribe` channel supplied by
//!   the embedder. `MemoryTransport` connects two runtimes in one process.
//! - **Exposure**: an `ExposedApi` lists its methods explicitly. Each method
//!   is served on `"<Api>:<method>"` by a dispatcher that restores arguments
//!   and marshals results with `neowire`.
//! - **Binding**: `Runtime::bind` runs the discovery handshake and returns a
//!   cached `ApiProxy` for the name.
//! - **Callbacks**: function arguments travel as channel names and are
//!   invoked back across the connection.

pub mod api;
pub mod bind;
pub mod builder;
mod callback;
pub mod config;
pub mod dispatch;
pub mod memory;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod transport;


pub use api::Api;
pub use api::ApiBuilder;
pub use api::Args;
pub use api::ExposedApi;
pub use api::Fault;
pub use bind::BindState;
pub use builder::RuntimeBuilder;
pub use config::Config;
pub use dispatch::FaultReport;
pub use memory::MemoryTransport;
pub use neowire;
pub use proxy::ApiProxy;
pub use proxy::CallError;
pub use registry::ApiRegistration;
pub use registry::ExposeError;
pub use runtime::Runtime;
pub use transport::Transport;
