//! # API Registry
//!
//! Two directories of API registrations:
//!
//! - `LocalRegistry`: the APIs this process exposes. Consulted when the peer
//!   asks whether an API exists.
//! - `RemoteDirectory`: the registrations the peer has announced. Append-only;
//!   every waiting bind polls it.
//!
//! ## Invariants
//!
//! - An API name is claimed by exactly one owner type per process. Claiming it
//!   again with the same owner is a no-op, with a different owner an error.
//! - A registration is published only after all of its handlers are installed,
//!   so a peer that sees it can call every listed method.
//! - A name is owned only once its registration is published.
//! - Registrations never change once published.

use std::any::TypeId;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use serde::Serialize;

use crate::transport;

/// Separator between API name and method name on the wire.
pub const WIRE_SEPARATOR: char = ':';

/// Errors raised while exposing an API.
#[derive(Debug, thiserror::Error)]
pub enum ExposeError {
    /// Two different types tried to expose APIs under the same name.
    #[error("API name '{api}' is already exposed by {existing}; cannot expose {attempted} under the same name")]
    NameConflict {
        api: String,
        existing: &'static str,
        attempted: &'static str,
    },
    /// The name cannot be used to build wire names.
    #[error("invalid API name '{0}': names must be non-empty and must not contain '{sep}'", sep = WIRE_SEPARATOR)]
    InvalidName(String),
    /// A method handler could not be installed on the transport.
    #[error("failed to install method handler: {0}")]
    Transport(#[from] transport::Error),
}

/// The announced shape of an exposed API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRegistration {
    pub api_name: String,
    pub method_names: Vec<String>,
}

impl ApiRegistration {
    pub fn has_method(&self, method: &str) -> bool {
        self.method_names.iter().any(|name| name == method)
    }
}

/// Builds the channel name a method is invoked on.
pub fn wire_name(api: &str, method: &str) -> String {
    format!("{}{}{}", api, WIRE_SEPARATOR, method)
}

pub(crate) fn validate_api_name(name: &str) -> Result<(), ExposeError> {
    if name.is_empty() || name.contains(WIRE_SEPARATOR) {
        return Err(ExposeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Outcome of claiming an API name.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The name was free and now belongs to the caller.
    Fresh,
    /// The same owner already claimed the name.
    Existing,
}

struct Owner {
    id: TypeId,
    name: &'static str,
}

/// APIs exposed by this process.
#[derive(Default)]
pub struct LocalRegistry {
    owners: DashMap<String, Owner>,
    entries: DashMap<String, ApiRegistration>,
}

impl LocalRegistry {
    /// Claims the name for `owner`, runs `install` and publishes the
    /// registration, all under the claim's lock.
    ///
    /// A concurrent exposure of the same name waits for the lock, so it only
    /// ever observes a published registration. If `install` fails nothing is
    /// claimed.
    pub(crate) fn register<F>(
        &self,
        registration: ApiRegistration,
        owner: TypeId,
        owner_name: &'static str,
        install: F,
    ) -> Result<Claim, ExposeError>
    where
        F: FnOnce() -> Result<(), ExposeError>,
    {
        let api = registration.api_name.clone();
        match self.owners.entry(api.clone()) {
            Entry::Occupied(existing) if existing.get().id == owner => Ok(Claim::Existing),
            Entry::Occupied(existing) => Err(ExposeError::NameConflict {
                api,
                existing: existing.get().name,
                attempted: owner_name,
            }),
            Entry::Vacant(slot) => {
                install()?;
                self.entries.insert(api, registration);
                slot.insert(Owner { id: owner, name: owner_name });
                Ok(Claim::Fresh)
            }
        }
    }

    /// Looks up a published registration.
    pub fn get(&self, api: &str) -> Option<ApiRegistration> {
        self.entries.get(api).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registrations announced by the peer.
#[derive(Default)]
pub struct RemoteDirectory {
    entries: DashMap<String, ApiRegistration>,
}

impl RemoteDirectory {
    /// Records an announcement. The first announcement for a name wins.
    pub(crate) fn record(&self, registration: ApiRegistration) -> bool {
        match self.entries.entry(registration.api_name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(registration);
                true
            }
        }
    }

    pub fn get(&self, api: &str) -> Option<ApiRegistration> {
        self.entries.get(api).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, api: &str) -> bool {
        self.entries.contains_key(api)
    }
}
