//! Per-system parameter overrides carried on the input snapshot.
//!
//! Only `temperature` (K) and `pressure` (atm) may be overridden. Unknown
//! keys are a configuration error; a known key whose value does not parse
//! is ignored with a warning and the job value stands.

use mdflow_core::{MdError, Result};
use std::collections::BTreeMap;

pub const TEMPERATURE_KEY: &str = "temperature";
pub const PRESSURE_KEY: &str = "pressure";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemOverrides {
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
}

impl SystemOverrides {
    pub fn from_map(raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut overrides = Self::default();
        for (key, value) in raw {
            let slot = match key.trim().to_ascii_lowercase().as_str() {
                TEMPERATURE_KEY => &mut overrides.temperature,
                PRESSURE_KEY => &mut overrides.pressure,
                _ => {
                    return Err(MdError::config(format!(
                        "unknown system override '{}' (allowed: {}, {})",
                        key, TEMPERATURE_KEY, PRESSURE_KEY
                    )))
                }
            };
            match value.trim().parse::<f64>() {
                Ok(v) if v.is_finite() && v > 0.0 => *slot = Some(v),
                _ => log::warn!("Ignoring unparseable override {} = '{}'", key, value),
            }
        }
        Ok(overrides)
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.pressure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_known_keys_parse() {
        let o = SystemOverrides::from_map(&map(&[("temperature", "310"), ("Pressure", " 2.5 ")])).unwrap();
        assert_eq!(o.temperature, Some(310.0));
        assert_eq!(o.pressure, Some(2.5));
    }

    #[test]
    fn test_unparseable_value_is_ignored() {
        let o = SystemOverrides::from_map(&map(&[("temperature", "warm")])).unwrap();
        assert!(o.is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = SystemOverrides::from_map(&map(&[("timestep", "0.001")])).unwrap_err();
        assert!(matches!(err, MdError::ConfigError(_)));
    }
}
