//! # Thrown-Value Relay
//!
//! Carries a deliberately relayed error from the exposing side to the caller.
//!
//! ## Invariants
//! - A relayed payload is always a JSON object carrying the `__relayed` marker.
//! - Stacks never cross the boundary. The receiver always gets a synthetic
//!   one-line trace naming where the value was thrown.
//! - A non-object thrown value is boxed on the way out and unboxed on the way
//!   in, so the caller sees exactly the value that was thrown.

use std::fmt;

use serde_json::Map;
use serde_json::Value as Json;

use crate::envelope::Reply;
use crate::error::Error;
use crate::error::Result;
use crate::info::RestorationInfo;
use crate::info::THROWN_VALUE_CLASS;
use crate::info::make_restoration_info;
use crate::restore::Restorer;
use crate::restore::restore_value;
use crate::value::Class;
use crate::value::ErrorValue;
use crate::value::Value;

/// Marker key that distinguishes a relayed throw from a normal return value.
pub const RELAY_TAG: &str = "__relayed";

/// A relayed error as received by the caller.
#[derive(Clone, Debug)]
pub struct Thrown {
    /// The thrown value, restored as far as the restorer allows.
    pub value: Value,
    /// Synthetic trace naming the origin of the throw.
    pub stack: String,
}

impl Thrown {
    /// The error message, if the thrown value is error-like.
    pub fn message(&self) -> Option<String> {
        match &self.value {
            Value::Error(error) => Some(error.message.clone()),
            Value::Instance(instance) => instance.error_message(),
            Value::Data(Json::Object(object)) => object.get("message").and_then(Json::as_str).map(str::to_string),
            _ => None,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match &self.value {
            Value::Error(error) => Some(&error.class_name),
            Value::Instance(instance) => Some(instance.class_name()),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Class>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&headline(&self.value))
    }
}

impl std::error::Error for Thrown {}

fn boxed(value: Json) -> (Map<String, Json>, RestorationInfo) {
    let mut object = Map::new();
    object.insert("value".into(), value);
    (object, RestorationInfo::new(THROWN_VALUE_CLASS))
}

/// Marshals a thrown value into the reply that relays it.
pub fn make_rethrown_return_value(thrown: Value) -> Result<Reply> {
    let info = make_restoration_info(&thrown);

    let (mut object, info) = match thrown {
        Value::Data(Json::Object(object)) => (object, info),
        Value::Data(other) => {
            let (object, info) = boxed(other);
            (object, Some(info))
        }
        Value::Instance(instance) => match instance.to_json()? {
            Json::Object(mut object) => {
                if let Some(message) = instance.error_message() {
                    object.insert("message".into(), Json::String(message));
                }
                (object, info)
            }
            other => {
                let (object, info) = boxed(other);
                (object, Some(info))
            }
        },
        Value::Error(error) => (error.to_object(), info),
        Value::Callback(_) => return Err(Error::CallbackNotTransferable("thrown values")),
    };

    object.remove("stack");
    object.insert(RELAY_TAG.into(), Json::Bool(true));
    Ok(Reply(Json::Object(object), info))
}

/// True iff the wire value carries the relay marker.
pub fn was_thrown_value(wire: &Json) -> bool {
    wire.get(RELAY_TAG).is_some()
}

/// Rebuilds a relayed throw. `origin` names where it was thrown and ends up in
/// the synthetic stack.
pub fn restore_thrown_value(
    wire: Json,
    info: Option<&RestorationInfo>,
    restorer: Option<&dyn Restorer>,
    origin: &str,
) -> Thrown {
    let mut object = match wire {
        Json::Object(object) => object,
        other => return with_stack(Value::Data(other), origin),
    };
    object.remove(RELAY_TAG);
    object.remove("stack");

    let is_error = info.is_some_and(|info| info.is_error);
    let class_name = info.map(|info| info.class_name.clone());
    let plain = object.clone();

    let value = match restore_value(Json::Object(object), info, restorer) {
        Value::Instance(instance) if instance.is_error() || !is_error => Value::Instance(instance),
        Value::Data(json) if !is_error => Value::Data(json),
        _ => {
            let class_name = class_name.as_deref().unwrap_or(crate::value::ERROR_CLASS);
            Value::Error(ErrorValue::from_object(class_name, plain))
        }
    };

    with_stack(value, origin)
}

fn with_stack(mut value: Value, origin: &str) -> Thrown {
    let stack = format!("{}\n    at {}", headline(&value), origin);
    if let Value::Error(error) = &mut value {
        error.stack = Some(stack.clone());
    }
    Thrown { value, stack }
}

fn headline(value: &Value) -> String {
    match value {
        Value::Error(error) => error.to_string(),
        Value::Instance(instance) => match instance.error_message() {
            Some(message) => format!("{}: {}", instance.class_name(), message),
            None => instance.class_name().to_string(),
        },
        Value::Data(json) => format!("Uncaught {}", json),
        Value::Callback(_) => "Uncaught function".to_string(),
    }
}
