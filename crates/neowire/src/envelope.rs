//! # Call and Reply Envelopes
//!
//! Defines what a call and its reply look like on the wire.
//!
//! ```text
//! call:  { "args": [a0, a1, ...], "meta": [RestorationInfo, ...] }
//! reply: [value, RestorationInfo | null]
//! ```
//!
//! ## Invariants
//! - `args` only ever holds plain data; callbacks are replaced by channel names.
//! - Every `meta` entry produced here carries the index of the argument it tags.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;

use crate::error::Error;
use crate::error::Result;
use crate::info::RestorationInfo;
use crate::info::make_restoration_info;
use crate::restore::Restorer;
use crate::restore::restore_value;
use crate::value::Callback;
use crate::value::Value;

/// The payload of one RPC call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub args: Vec<Json>,
    #[serde(default)]
    pub meta: Vec<RestorationInfo>,
}

impl CallEnvelope {
    pub fn to_json(&self) -> Result<Json> {
        serde_json::to_value(self).map_err(|e| Error::Malformed(e.to_string()))
    }

    pub fn from_json(json: Json) -> Result<Self> {
        serde_json::from_value(json).map_err(|e| Error::Malformed(e.to_string()))
    }
}

/// The response to one RPC call: the value and its tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply(pub Json, pub Option<RestorationInfo>);

impl Reply {
    pub fn to_json(&self) -> Result<Json> {
        serde_json::to_value(self).map_err(|e| Error::Malformed(e.to_string()))
    }

    pub fn from_json(json: Json) -> Result<Self> {
        serde_json::from_value(json).map_err(|e| Error::Malformed(e.to_string()))
    }
}

/// A call ready to send, plus the callbacks it extracted.
///
/// The caller must subscribe each `(channel, callback)` pair on its transport
/// before sending the envelope.
pub struct PreparedCall {
    pub envelope: CallEnvelope,
    pub callbacks: Vec<(String, Callback)>,
}

/// Arguments after restoration.
///
/// `callback_channels` lists the argument slots that still hold a channel
/// name in place of a function.
#[derive(Debug)]
pub struct RestoredArgs {
    pub values: Vec<Value>,
    pub callback_channels: Vec<(usize, String)>,
}

/// Converts a value to its plain-data form. `context` names where the value
/// was found, for the error raised on callbacks.
pub(crate) fn to_wire(value: Value, context: &'static str) -> Result<Json> {
    match value {
        Value::Data(json) => Ok(json),
        Value::Instance(instance) => instance.to_json(),
        Value::Error(error) => Ok(Json::Object(error.to_object())),
        Value::Callback(_) => Err(Error::CallbackNotTransferable(context)),
    }
}

/// Tags every argument and swaps callbacks for freshly allocated channel names.
pub fn prepare_args_for_transfer(
    args: Vec<Value>,
    mut allocate_channel: impl FnMut() -> String,
) -> Result<PreparedCall> {
    let mut wire_args = Vec::with_capacity(args.len());
    let mut meta = Vec::new();
    let mut callbacks = Vec::new();

    for (index, arg) in args.into_iter().enumerate() {
        if let Some(info) = make_restoration_info(&arg) {
            meta.push(info.at(index));
        }

        let wire = match arg {
            Value::Callback(callback) => {
                let channel = allocate_channel();
                callbacks.push((channel.clone(), callback));
                Json::String(channel)
            }
            other => to_wire(other, "arguments")?,
        };
        wire_args.push(wire);
    }

    Ok(PreparedCall {
        envelope: CallEnvelope { args: wire_args, meta },
        callbacks,
    })
}

/// Restores every argument of an incoming call.
///
/// Tags without an `arg_index` are matched to arguments by their position in
/// the `meta` list.
pub fn restore_args(envelope: CallEnvelope, restorer: Option<&dyn Restorer>) -> RestoredArgs {
    let CallEnvelope { args, meta } = envelope;

    let tags: HashMap<usize, RestorationInfo> = meta
        .into_iter()
        .enumerate()
        .map(|(position, info)| (info.arg_index.unwrap_or(position), info))
        .collect();

    let mut values = Vec::with_capacity(args.len());
    let mut callback_channels = Vec::new();

    for (index, wire) in args.into_iter().enumerate() {
        let info = tags.get(&index);

        if let Some(info) = info.filter(|info| info.is_callback) {
            match &wire {
                Json::String(channel) => callback_channels.push((index, channel.clone())),
                other => tracing::warn!(index, class = %info.class_name, payload = %other, "callback argument without a channel name"),
            }
        }

        values.push(restore_value(wire, info, restorer));
    }

    RestoredArgs { values, callback_channels }
}

/// Tags and flattens a return value.
pub fn marshal_return(value: Value) -> Result<Reply> {
    let info = make_restoration_info(&value);
    let wire = to_wire(value, "return values")?;
    Ok(Reply(wire, info))
}
