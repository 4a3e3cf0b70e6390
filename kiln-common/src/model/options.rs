// kiln-common/src/model/options.rs
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical build configuration: one boolean per declared option, keyed by
/// the option's canonical name. Options nobody asked for are off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
    values: BTreeMap<String, bool>,
}

impl ResolvedConfig {
    pub fn with_declared<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            values: names.into_iter().map(|n| (n.to_string(), false)).collect(),
        }
    }

    pub fn set(&mut self, name: &str, value: bool) {
        self.values.insert(name.to_string(), value);
    }

    /// Undeclared names read as off.
    pub fn is_on(&self, name: &str) -> bool {
        self.values.get(name).copied().unwrap_or(false)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(name, on)| (name.as_str(), *on))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled: Vec<&str> = self.enabled().collect();
        if enabled.is_empty() {
            write!(f, "(defaults)")
        } else {
            write!(f, "--{}", enabled.join(" --"))
        }
    }
}
