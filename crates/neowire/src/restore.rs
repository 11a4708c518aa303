//! # Restorers
//!
//! Rebuilds class instances from plain data. A class the restorer does not
//! know is not an error: the value stays plain data, or a generic
//! `ErrorValue` when it was tagged as an error.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::info::RestorationInfo;
use crate::info::THROWN_VALUE_CLASS;
use crate::value::Class;
use crate::value::ErrorValue;
use crate::value::Instance;
use crate::value::Value;

/// Maps a class name and its plain-data form back to an instance.
pub trait Restorer: Send + Sync {
    /// Returns `None` when the class name is not recognized.
    fn restore(&self, class_name: &str, data: &Json) -> Option<Instance>;
}

impl<F> Restorer for F
where
    F: Fn(&str, &Json) -> Option<Instance> + Send + Sync,
{
    fn restore(&self, class_name: &str, data: &Json) -> Option<Instance> {
        self(class_name, data)
    }
}

type RestoreFn = fn(&Json) -> Option<Instance>;

/// A restorer backed by a table of registered `Class` types.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<&'static str, RestoreFn>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `T::NAME`.
    pub fn register<T: Class>(mut self) -> Self {
        self.classes.insert(T::NAME, restore_class::<T>);
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }
}

impl Restorer for ClassRegistry {
    fn restore(&self, class_name: &str, data: &Json) -> Option<Instance> {
        self.classes.get(class_name).and_then(|restore| restore(data))
    }
}

fn restore_class<T: Class>(data: &Json) -> Option<Instance> {
    match serde_json::from_value::<T>(data.clone()) {
        Ok(value) => Some(Instance::new(value)),
        Err(e) => {
            tracing::warn!(class = T::NAME, error = %e, "payload does not fit registered class, keeping plain data");
            None
        }
    }
}

/// Restores a single value from its wire form and optional tag.
///
/// Callback-tagged values are left as their channel name; hydrating them into
/// a callable stand-in needs a transport and is done by the caller.
pub fn restore_value(wire: Json, info: Option<&RestorationInfo>, restorer: Option<&dyn Restorer>) -> Value {
    let Some(info) = info else {
        return Value::Data(wire);
    };

    if info.is_callback {
        return Value::Data(wire);
    }

    if info.class_name == THROWN_VALUE_CLASS {
        return match wire {
            Json::Object(mut object) => Value::Data(object.remove("value").unwrap_or(Json::Null)),
            other => Value::Data(other),
        };
    }

    if let Some(restorer) = restorer {
        if let Some(instance) = restorer.restore(&info.class_name, &wire) {
            return Value::Instance(instance);
        }
    }

    match wire {
        Json::Object(object) if info.is_error => {
            tracing::trace!(class = %info.class_name, "no restorer for error class, rebuilding generic error");
            Value::Error(ErrorValue::from_object(&info.class_name, object))
        }
        wire => {
            tracing::trace!(class = %info.class_name, "no restorer for class, keeping plain data");
            Value::Data(wire)
        }
    }
}
