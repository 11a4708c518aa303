//! # Restoration Metadata
//!
//! Side-channel tags describing how to rebuild a value from its plain form.
//!
//! ## Invariants
//! - Primitives carry no tag.
//! - Tags travel beside the payload, never inside it, so an untagged payload
//!   is still valid plain data.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;

use crate::value::Value;

/// Class name recorded for plain JSON objects.
pub const OBJECT_CLASS: &str = "Object";
/// Class name recorded for plain JSON arrays.
pub const ARRAY_CLASS: &str = "Array";
/// Class name recorded for callbacks.
pub const FUNCTION_CLASS: &str = "Function";
/// Class name of the box a non-object thrown value travels in.
pub const THROWN_VALUE_CLASS: &str = "ThrownValue";

/// Per-value restoration tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_index: Option<usize>,
    pub class_name: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_callback: bool,
}

impl RestorationInfo {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            arg_index: None,
            class_name: class_name.into(),
            is_error: false,
            is_callback: false,
        }
    }

    pub(crate) fn at(mut self, index: usize) -> Self {
        self.arg_index = Some(index);
        self
    }
}

/// Computes the restoration tag for a value, or `None` for primitives.
pub fn make_restoration_info(value: &Value) -> Option<RestorationInfo> {
    match value {
        Value::Data(Json::Object(_)) => Some(RestorationInfo::new(OBJECT_CLASS)),
        Value::Data(Json::Array(_)) => Some(RestorationInfo::new(ARRAY_CLASS)),
        Value::Data(_) => None,
        Value::Instance(instance) => Some(RestorationInfo {
            is_error: instance.is_error(),
            ..RestorationInfo::new(instance.class_name())
        }),
        Value::Error(error) => Some(RestorationInfo {
            is_error: true,
            ..RestorationInfo::new(error.class_name.clone())
        }),
        Value::Callback(_) => Some(RestorationInfo {
            is_callback: true,
            ..RestorationInfo::new(FUNCTION_CLASS)
        }),
    }
}
