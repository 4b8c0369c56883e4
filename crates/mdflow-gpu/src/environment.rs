//! Execution-environment detection.
//!
//! Decides whether device arbitration applies: only on a local shared host
//! (not the managed cluster, whose scheduler already hands out devices) and
//! only when a visible-device list is configured.

use crate::device_lock::{DeviceArbiter, LockSettings};
use mdflow_core::Result;

/// Marks the managed cluster when set to `1`, `true` or `yes`.
pub const MANAGED_CLUSTER_VAR: &str = "MDFLOW_MANAGED_CLUSTER";

/// Comma-separated visible device ids.
pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    pub managed_cluster: bool,
    pub visible_devices: Option<Vec<String>>,
}

impl ExecutionEnvironment {
    /// Reads the process environment.
    pub fn detect() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the environment from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let managed_cluster = lookup(MANAGED_CLUSTER_VAR)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let visible_devices = lookup(VISIBLE_DEVICES_VAR).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        let env = Self {
            managed_cluster,
            visible_devices,
        };
        log::debug!("Execution environment: {:?}", env);
        env
    }

    /// Devices to arbitrate over, `None` when arbitration is bypassed.
    pub fn local_devices(&self) -> Option<&[String]> {
        if self.managed_cluster {
            return None;
        }
        match self.visible_devices.as_deref() {
            Some(devices) if !devices.is_empty() => Some(devices),
            _ => None,
        }
    }

    /// Arbiter over the local devices, if arbitration applies here.
    pub fn arbiter(&self, settings: LockSettings) -> Result<Option<DeviceArbiter>> {
        match self.local_devices() {
            Some(devices) => Ok(Some(DeviceArbiter::new(devices.to_vec(), settings)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> ExecutionEnvironment {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ExecutionEnvironment::from_vars(|k| map.get(k).cloned())
    }

    #[test]
    fn test_local_host_with_devices() {
        let e = env(&[(VISIBLE_DEVICES_VAR, "0, 1,,3")]);
        assert_eq!(e.local_devices().unwrap(), ["0", "1", "3"]);
        assert!(e.arbiter(LockSettings::default()).unwrap().is_some());
    }

    #[test]
    fn test_managed_cluster_bypasses_arbiter() {
        let e = env(&[(MANAGED_CLUSTER_VAR, "True"), (VISIBLE_DEVICES_VAR, "0,1")]);
        assert!(e.managed_cluster);
        assert!(e.local_devices().is_none());
    }

    #[test]
    fn test_no_device_list_bypasses_arbiter() {
        assert!(env(&[]).local_devices().is_none());
        assert!(env(&[(VISIBLE_DEVICES_VAR, " , ")]).local_devices().is_none());
        assert!(env(&[(MANAGED_CLUSTER_VAR, "0")]).arbiter(LockSettings::default()).unwrap().is_none());
    }
}
