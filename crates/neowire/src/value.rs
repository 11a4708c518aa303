//! # Value Model
//!
//! The in-memory shape of everything that crosses the boundary.
//!
//! A `Value` is either plain data, a class instance, a generic error object,
//! or a callback. Only plain data is JSON-like; the other variants are turned
//! into plain data (plus a `RestorationInfo`) at marshal time and rebuilt at
//! restore time.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value as Json;

use crate::error::Error;
use crate::error::Result;

/// Class name given to generic error objects.
pub const ERROR_CLASS: &str = "Error";

/// A user type that keeps its identity across the boundary.
///
/// The instance travels as its serde representation and is rebuilt on the
/// other side by a `Restorer` that knows `NAME`. A class whose
/// `error_message` returns `Some` is treated as an error subclass.
pub trait Class: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;

    fn error_message(&self) -> Option<String> {
        None
    }
}

trait ErasedClass: fmt::Debug + Send + Sync {
    fn class_name(&self) -> &'static str;
    fn to_json(&self) -> Result<Json>;
    fn error_message(&self) -> Option<String>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Class> ErasedClass for T {
    fn class_name(&self) -> &'static str {
        T::NAME
    }

    fn to_json(&self) -> Result<Json> {
        serde_json::to_value(self).map_err(|e| Error::Serialization {
            class: T::NAME.to_string(),
            reason: e.to_string(),
        })
    }

    fn error_message(&self) -> Option<String> {
        Class::error_message(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased, shareable class instance.
#[derive(Clone, Debug)]
pub struct Instance {
    inner: Arc<dyn ErasedClass>,
}

impl Instance {
    pub fn new<T: Class>(value: T) -> Self {
        Self { inner: Arc::new(value) }
    }

    pub fn class_name(&self) -> &'static str {
        self.inner.class_name()
    }

    pub fn is_error(&self) -> bool {
        self.inner.error_message().is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.error_message()
    }

    /// Returns the concrete instance if it is a `T`.
    pub fn downcast_ref<T: Class>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Converts the instance to its plain-data form.
    pub fn to_json(&self) -> Result<Json> {
        self.inner.to_json()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A generic error object.
///
/// This is what a relayed error becomes when the receiving side has no
/// dedicated class for it. `stack` never survives the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    pub class_name: String,
    pub message: String,
    pub fields: Map<String, Json>,
    pub stack: Option<String>,
}

impl ErrorValue {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_class(ERROR_CLASS, message)
    }

    pub fn with_class(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            fields: Map::new(),
            stack: None,
        }
    }

    /// Attaches an extra field that travels with the error.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Plain-data form: extra fields plus `message`. The stack is dropped.
    pub(crate) fn to_object(&self) -> Map<String, Json> {
        let mut object = self.fields.clone();
        object.remove("stack");
        object.insert("message".into(), Json::String(self.message.clone()));
        object
    }

    /// Rebuilds an error from its plain-data form.
    pub(crate) fn from_object(class_name: &str, mut object: Map<String, Json>) -> Self {
        let message = match object.remove("message") {
            Some(Json::String(message)) => message,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        object.remove("stack");

        Self {
            class_name: class_name.to_string(),
            message,
            fields: object,
            stack: None,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

impl std::error::Error for ErrorValue {}

/// Something a `Callback` can deliver invocations to.
pub trait CallbackTarget: Send + Sync {
    fn invoke(&self, args: Vec<Json>) -> BoxFuture<'static, Result<()>>;

    /// The channel this target forwards to, if it is a remote stand-in.
    fn channel(&self) -> Option<&str> {
        None
    }
}

struct LocalFn<F>(F);

impl<F> CallbackTarget for LocalFn<F>
where
    F: Fn(Vec<Json>) + Send + Sync + 'static,
{
    fn invoke(&self, args: Vec<Json>) -> BoxFuture<'static, Result<()>> {
        (self.0)(args);
        futures::future::ready(Ok(())).boxed()
    }
}

/// A function value passed as an argument.
///
/// Callbacks never travel over the wire themselves; the sender swaps them for
/// a channel name and the receiver gets a stand-in that sends to that channel.
#[derive(Clone)]
pub struct Callback {
    target: Arc<dyn CallbackTarget>,
}

impl Callback {
    /// Wraps a local closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Json>) + Send + Sync + 'static,
    {
        Self { target: Arc::new(LocalFn(f)) }
    }

    pub fn from_target(target: Arc<dyn CallbackTarget>) -> Self {
        Self { target }
    }

    /// Invokes the callback with the given argument list.
    pub async fn call(&self, args: Vec<Json>) -> Result<()> {
        self.target.invoke(args).await
    }

    pub fn channel(&self) -> Option<&str> {
        self.target.channel()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.target, &other.target)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel() {
            Some(channel) => write!(f, "Callback(remote {})", channel),
            None => write!(f, "Callback(local)"),
        }
    }
}

/// A value as seen by API code on either side.
#[derive(Clone, Debug)]
pub enum Value {
    /// Primitives and plain structural data.
    Data(Json),
    /// An instance of a registered `Class`.
    Instance(Instance),
    /// A generic error object.
    Error(ErrorValue),
    /// A function value.
    Callback(Callback),
}

impl Value {
    pub fn null() -> Self {
        Value::Data(Json::Null)
    }

    /// Serializes any plain data type into a `Value::Data`.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Value::Data)
            .map_err(|e| Error::Serialization {
                class: std::any::type_name::<T>().to_string(),
                reason: e.to_string(),
            })
    }

    /// True for everything that is not a JSON primitive.
    pub fn is_object(&self) -> bool {
        match self {
            Value::Data(json) => json.is_object() || json.is_array(),
            _ => true,
        }
    }

    pub fn as_data(&self) -> Option<&Json> {
        match self {
            Value::Data(json) => Some(json),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<Json> {
        match self {
            Value::Data(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Class>(&self) -> Option<&T> {
        self.as_instance().and_then(Instance::downcast_ref::<T>)
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Value::Callback(callback) => Some(callback),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => a.ptr_eq(b),
            (Value::Callback(a), Value::Callback(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::Data(json)
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Value::Instance(instance)
    }
}

impl From<ErrorValue> for Value {
    fn from(error: ErrorValue) -> Self {
        Value::Error(error)
    }
}

impl From<Callback> for Value {
    fn from(callback: Callback) -> Self {
        Value::Callback(callback)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Data(Json::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Data(Json::String(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Data(Json::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Data(Json::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Data(Json::from(n))
    }
}
