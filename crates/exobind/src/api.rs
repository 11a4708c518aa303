//! # Exposed APIs
//!
//! An API is an explicit, ordered list of named async methods bound to one
//! shared instance. There is no reflection: the author lists the methods.
//!
//! Methods return `Result<Value, Fault>`. A `Fault::Relay` reaches the caller
//! as a thrown value; a `Fault::Internal` never leaves this process.

use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use neowire::Callback;
use neowire::Class;
use neowire::Value;
use serde::de::DeserializeOwned;

/// Method names starting with one of these are private and never exposed.
pub const PRIVATE_PREFIXES: [char; 2] = ['_', '#'];

/// Why an exposed method did not return a value.
#[derive(Debug)]
pub enum Fault {
    /// An error the author chose to deliver to the caller.
    Relay(Value),
    /// A defect in the method. Reported locally, never delivered.
    Internal(anyhow::Error),
}

impl Fault {
    /// Wraps a value for delivery to the caller.
    pub fn relay(thrown: impl Into<Value>) -> Self {
        Fault::Relay(thrown.into())
    }

    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        Fault::Internal(error.into())
    }
}

impl<E> From<E> for Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Fault::Internal(error.into())
    }
}

pub type MethodResult = Result<Value, Fault>;

/// A type-erased exposed method.
pub type Method = Arc<dyn Fn(Args) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// The restored arguments of one call.
#[derive(Debug, Default)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn require(&self, index: usize) -> Result<&Value, Fault> {
        self.values
            .get(index)
            .ok_or_else(|| Fault::Internal(anyhow::anyhow!("missing argument {}", index)))
    }

    /// Deserializes a plain-data argument.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, Fault> {
        let json = match self.require(index)? {
            Value::Data(json) => json.clone(),
            Value::Instance(instance) => instance.to_json()?,
            other => return Err(Fault::Internal(anyhow::anyhow!("argument {} is not plain data: {:?}", index, other))),
        };
        serde_json::from_value(json)
            .map_err(|e| Fault::Internal(anyhow::anyhow!("argument {} has the wrong shape: {}", index, e)))
    }

    pub fn callback(&self, index: usize) -> Result<Callback, Fault> {
        match self.require(index)? {
            Value::Callback(callback) => Ok(callback.clone()),
            other => Err(Fault::Internal(anyhow::anyhow!("argument {} is not a callback: {:?}", index, other))),
        }
    }

    /// Borrows a restored class instance.
    pub fn instance<T: Class>(&self, index: usize) -> Result<&T, Fault> {
        self.require(index)?
            .downcast_ref::<T>()
            .ok_or_else(|| Fault::Internal(anyhow::anyhow!("argument {} is not a {}", index, T::NAME)))
    }
}

/// A fully described API, ready to expose.
pub struct ExposedApi {
    pub(crate) name: String,
    pub(crate) owner: TypeId,
    pub(crate) owner_name: &'static str,
    pub(crate) methods: Vec<(String, Method)>,
}

impl ExposedApi {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Collects the methods of an API around one shared instance.
pub struct ApiBuilder<T> {
    name: String,
    instance: Arc<T>,
    methods: Vec<(String, Method)>,
}

impl<T: Send + Sync + 'static> ApiBuilder<T> {
    pub fn new(name: impl Into<String>, instance: Arc<T>) -> Self {
        Self {
            name: name.into(),
            instance,
            methods: Vec::new(),
        }
    }

    /// Adds a method. Private names are skipped; redefining a name replaces
    /// the earlier method in place.
    pub fn method<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        if name.starts_with(PRIVATE_PREFIXES) {
            tracing::debug!(api = %self.name, method = name, "skipping private method");
            return self;
        }

        let instance = self.instance.clone();
        let method: Method = Arc::new(move |args| f(instance.clone(), args).boxed());

        match self.methods.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = method,
            None => self.methods.push((name.to_string(), method)),
        }
        self
    }

    pub fn build(self) -> ExposedApi {
        ExposedApi {
            name: self.name,
            owner: TypeId::of::<T>(),
            owner_name: std::any::type_name::<T>(),
            methods: self.methods,
        }
    }
}

/// A type that describes its own API.
pub trait Api: Send + Sync + Sized + 'static {
    /// The name the API is exposed under. Defaults to the type's name.
    fn api_name() -> String {
        short_type_name::<Self>()
    }

    fn define(builder: ApiBuilder<Self>) -> ApiBuilder<Self>;

    fn into_exposed(self: Arc<Self>) -> ExposedApi {
        Self::define(ApiBuilder::new(Self::api_name(), self)).build()
    }
}

/// `my_crate::auth::AuthApi<u8>` becomes `AuthApi`.
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
