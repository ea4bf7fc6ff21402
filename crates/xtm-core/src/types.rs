//! Core domain types shared by every crate in the workspace

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────
// OS Version
// ─────────────────────────────────────────────────────────────────

/// Device OS version as reported by lockdown (`ProductVersion`).
///
/// Missing components parse as zero, so `"17"` equals `"17.0.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl OsVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for OsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('.');
        let mut next = |required: bool| -> Result<u32, Error> {
            match parts.next() {
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidVersion(trimmed.to_string())),
                None if required => Err(Error::InvalidVersion(trimmed.to_string())),
                None => Ok(0),
            }
        };

        let version = OsVersion::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(Error::InvalidVersion(trimmed.to_string()));
        }
        Ok(version)
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ─────────────────────────────────────────────────────────────────
// Protocol Generation
// ─────────────────────────────────────────────────────────────────

/// The three incompatible generations of the testmanagerd protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// iOS < 14: single lockdown connection, pushed configuration
    Legacy,
    /// iOS 14 – 16: secure lockdown service, pushed configuration
    Mid,
    /// iOS 17+: remote service over the device tunnel, in-memory configuration
    Modern,
}

impl ProtocolGeneration {
    /// First version served by the mid-generation protocol.
    pub const MID_BOUNDARY: OsVersion = OsVersion::new(14, 0, 0);
    /// First version served by the modern protocol.
    pub const MODERN_BOUNDARY: OsVersion = OsVersion::new(17, 0, 0);

    /// Select the generation for a device version.
    pub fn for_version(version: OsVersion) -> Self {
        if version < Self::MID_BOUNDARY {
            ProtocolGeneration::Legacy
        } else if version < Self::MODERN_BOUNDARY {
            ProtocolGeneration::Mid
        } else {
            ProtocolGeneration::Modern
        }
    }

    /// Whether the session configuration is pushed into the runner's sandbox.
    pub fn delivers_config_on_device(&self) -> bool {
        !matches!(self, ProtocolGeneration::Modern)
    }
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolGeneration::Legacy => write!(f, "legacy (iOS < 14)"),
            ProtocolGeneration::Mid => write!(f, "mid (iOS 14-16)"),
            ProtocolGeneration::Modern => write!(f, "modern (iOS 17+)"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Identifier
// ─────────────────────────────────────────────────────────────────

/// Run-scoped identifier correlating every message of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Uppercase form expected by the runner's `XCTestSessionIdentifier`.
    pub fn canonical(&self) -> String {
        self.0.hyphenated().to_string().to_uppercase()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ─────────────────────────────────────────────────────────────────
// Capabilities
// ─────────────────────────────────────────────────────────────────

/// Named feature flags exchanged when opening a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeMap<String, u64>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a capability set where every named flag is enabled.
    pub fn enabled<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(names.into_iter().map(|n| (n.to_string(), 1)).collect())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: u64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v != 0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, u64)> for Capabilities {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ─────────────────────────────────────────────────────────────────
// Installed Application
// ─────────────────────────────────────────────────────────────────

/// Metadata of an installed application, resolved once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Install path of the `.app` bundle on the device
    pub path: String,
    /// Human-readable `CFBundleName`
    pub bundle_name: String,
    /// `CFBundleIdentifier`
    pub bundle_id: String,
    /// Sandbox home directory; absent if the app declares none
    pub home: Option<String>,
}
