//! # NeoWire
//!
//! Value restoration for RPC across a process boundary.
//!
//! ## Architecture
//!
//! The transport between two processes only carries JSON-like data. This crate
//! turns richer values into that data and back:
//!
//! - **Tagging**: every object, class instance, error or callback gets a
//!   `RestorationInfo` that travels beside it, never inside it.
//! - **Restoration**: a `Restorer` rebuilds class instances from their tags.
//!   Unknown classes degrade to plain data.
//! - **Callbacks**: function arguments are swapped for channel names; the
//!   caller of this crate owns the channels.
//! - **Relay**: deliberately thrown values are tagged, stripped of their
//!   stacks and rebuilt at the call site.

mod envelope;
mod error;
mod info;
mod restore;
mod thrown;
mod value;


pub use envelope::CallEnvelope;
pub use envelope::PreparedCall;
pub use envelope::Reply;
pub use envelope::RestoredArgs;
pub use envelope::marshal_return;
pub use envelope::prepare_args_for_transfer;
pub use envelope::restore_args;
pub use error::Error;
pub use error::Result;
pub use info::ARRAY_CLASS;
pub use info::FUNCTION_CLASS;
pub use info::OBJECT_CLASS;
pub use info::RestorationInfo;
pub use info::THROWN_VALUE_CLASS;
pub use info::make_restoration_info;
pub use restore::ClassRegistry;
pub use restore::Restorer;
pub use restore::restore_value;
pub use thrown::RELAY_TAG;
pub use thrown::Thrown;
pub use thrown::make_rethrown_return_value;
pub use thrown::restore_thrown_value;
pub use thrown::was_thrown_value;
pub use value::Callback;
pub use value::CallbackTarget;
pub use value::Class;
pub use value::ERROR_CLASS;
pub use value::ErrorValue;
pub use value::Instance;
pub use value::Value;
