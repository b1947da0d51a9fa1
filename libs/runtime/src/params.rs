//! Adapter configuration parameters
//!
//! A [`ParameterSet`] is a plain string map. Each adapter type declares
//! mandatory keys and defaults; validation happens at activation time so a
//! misconfigured adapter fails its own activation without touching the rest
//! of the runtime. The set handed to a running worker is a snapshot -
//! reconfiguring requires deactivate/activate.

use crate::error::{Result, RuntimeError};
use std::collections::HashMap;
use std::time::Duration;

/// String-keyed configuration for one adapter instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: HashMap<String, String>,
}

impl ParameterSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw string lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Lookup with fallback
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a parameter as `f64`
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                RuntimeError::Configuration(format!(
                    "parameter {:?} is not numeric: {:?}",
                    key, raw
                ))
            }),
        }
    }

    /// Parse a parameter given in seconds into a [`Duration`]
    ///
    /// Negative, NaN or overflowing values are configuration errors, not
    /// panics.
    pub fn get_duration_secs(&self, key: &str) -> Result<Option<Duration>> {
        match self.get_f64(key)? {
            None => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
                RuntimeError::Configuration(format!(
                    "parameter {:?} is not a valid duration in seconds: {}",
                    key, secs
                ))
            }),
        }
    }

    /// Truthy-string interpretation: `1`, `true`, `y`, `yes`, `high`
    /// (case-insensitive) are `true`, everything else is `false`
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|raw| {
            matches!(
                raw.to_ascii_uppercase().as_str(),
                "1" | "TRUE" | "Y" | "YES" | "HIGH"
            )
        })
    }

    /// Fill in defaults for keys not explicitly configured
    pub fn apply_defaults(&mut self, defaults: &[(&str, &str)]) {
        for (key, value) in defaults {
            self.values
                .entry((*key).to_string())
                .or_insert_with(|| (*value).to_string());
        }
    }

    /// Check that every mandatory key is present
    ///
    /// Returns all missing keys at once so the operator fixes the
    /// configuration in one pass instead of one error per restart.
    pub fn validate(&self, adapter: &str, mandatory: &[&str]) -> Result<()> {
        let missing: Vec<String> = mandatory
            .iter()
            .filter(|key| !self.values.contains_key(**key))
            .map(|key| (*key).to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::MissingParameters {
                adapter: adapter.to_string(),
                missing,
            })
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
