//! One active run per device

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use xtm_core::prelude::*;

/// Tracks devices with a run in progress.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim `udid` until the returned guard is dropped.
    pub fn acquire(&self, udid: &str) -> Result<SessionGuard<'_>> {
        if !self.lock().insert(udid.to_string()) {
            return Err(Error::DeviceBusy {
                udid: udid.to_string(),
            });
        }
        debug!("Device {} claimed", udid);
        Ok(SessionGuard {
            registry: self,
            udid: udid.to_string(),
        })
    }

    pub fn is_active(&self, udid: &str) -> bool {
        self.lock().contains(udid)
    }
}

/// Releases the device on drop.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    udid: String,
}

impl SessionGuard<'_> {
    pub fn udid(&self) -> &str {
        &self.udid
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.udid);
        debug!("Device {} released", self.udid);
    }
}
