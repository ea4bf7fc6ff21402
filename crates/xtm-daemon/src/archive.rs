//! Decoded values of the keyed-archive wire format
//!
//! The archival encoding itself belongs to the transport collaborator. This
//! module only models the values that come out of (and go into) it, and the
//! [`Archiver`] seam used when a configuration has to be written to a file.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use xtm_core::prelude::*;
use xtm_core::{Capabilities, XcTestConfiguration};

/// One decoded archive object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArchivedValue {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Double(f64),
    Str(String),
    Data(Vec<u8>),
    Uuid(Uuid),
    Array(Vec<ArchivedValue>),
    Dict(BTreeMap<String, ArchivedValue>),
    /// `XCTCapabilities`
    Capabilities(Capabilities),
    /// `XCTestConfiguration`
    TestConfiguration(Box<XcTestConfiguration>),
}

impl ArchivedValue {
    /// Unsigned integer view; non-negative signed integers are accepted too.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ArchivedValue::UInt(v) => Some(*v),
            ArchivedValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArchivedValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArchivedValue::Double(v) => Some(*v),
            ArchivedValue::UInt(v) => Some(*v as f64),
            ArchivedValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArchivedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_capabilities(&self) -> Option<&Capabilities> {
        match self {
            ArchivedValue::Capabilities(caps) => Some(caps),
            _ => None,
        }
    }

    /// Short name of the variant, used in protocol diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ArchivedValue::Null => "null",
            ArchivedValue::Bool(_) => "bool",
            ArchivedValue::UInt(_) => "uint",
            ArchivedValue::Int(_) => "int",
            ArchivedValue::Double(_) => "double",
            ArchivedValue::Str(_) => "string",
            ArchivedValue::Data(_) => "data",
            ArchivedValue::Uuid(_) => "uuid",
            ArchivedValue::Array(_) => "array",
            ArchivedValue::Dict(_) => "dict",
            ArchivedValue::Capabilities(_) => "capabilities",
            ArchivedValue::TestConfiguration(_) => "test configuration",
        }
    }
}

impl fmt::Display for ArchivedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchivedValue::Null => write!(f, "null"),
            ArchivedValue::Bool(v) => write!(f, "{v}"),
            ArchivedValue::UInt(v) => write!(f, "{v}"),
            ArchivedValue::Int(v) => write!(f, "{v}"),
            ArchivedValue::Double(v) => write!(f, "{v}"),
            ArchivedValue::Str(s) => write!(f, "{s:?}"),
            ArchivedValue::Data(d) => write!(f, "<{} bytes>", d.len()),
            ArchivedValue::Uuid(u) => write!(f, "{u}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<XcTestConfiguration> for ArchivedValue {
    fn from(config: XcTestConfiguration) -> Self {
        ArchivedValue::TestConfiguration(Box::new(config))
    }
}

impl From<Capabilities> for ArchivedValue {
    fn from(caps: Capabilities) -> Self {
        ArchivedValue::Capabilities(caps)
    }
}

/// Render a reply payload for error messages.
pub fn describe_payload(payload: &[ArchivedValue]) -> String {
    let items: Vec<String> = payload.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Serializer for archive objects that are written to files on the device.
#[cfg_attr(any(test, feature = "test-helpers"), mockall::automock)]
pub trait Archiver: Send + Sync {
    /// Encode a value into the archival wire format.
    fn archive(&self, value: &ArchivedValue) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`Archiver::archive`].
    fn unarchive(&self, bytes: &[u8]) -> Result<ArchivedValue>;
}
