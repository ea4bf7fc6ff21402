//! Installed application lookup

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use xtm_core::prelude::*;
use xtm_core::AppInfo;

use crate::archive::ArchivedValue;

/// One record of the installation proxy's app listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub bundle_id: String,
    pub bundle_name: String,
    pub path: String,
    /// Raw `EnvironmentVariables` attribute of the app
    #[serde(default)]
    pub environment: BTreeMap<String, ArchivedValue>,
}

impl InstalledApp {
    /// Sandbox home, when the app declares a string-typed `HOME`.
    pub fn home(&self) -> Option<&str> {
        self.environment.get("HOME").and_then(ArchivedValue::as_str)
    }

    pub fn app_info(&self) -> AppInfo {
        AppInfo {
            path: self.path.clone(),
            bundle_name: self.bundle_name.clone(),
            bundle_id: self.bundle_id.clone(),
            home: self.home().map(str::to_string),
        }
    }
}

/// Find `bundle_id` by exact match in an already fetched app list.
pub fn resolve_app(bundle_id: &str, apps: &[InstalledApp]) -> Result<AppInfo> {
    apps.iter()
        .find(|app| app.bundle_id == bundle_id)
        .map(InstalledApp::app_info)
        .ok_or_else(|| Error::app_not_found(bundle_id))
}
