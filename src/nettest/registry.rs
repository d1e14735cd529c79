//! Test registry
//!
//! Maps short names to tests. A test that fails the conformance checks
//! is reported and left out; the rest are still registered.

use super::{NetTest, OptionSpec, RESUME_OPTION};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Why a test was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("test has an empty short name")]
    EmptyName,

    #[error("test {0} is already registered")]
    Duplicate(String),

    #[error("test {test} has a malformed option: {reason}")]
    BadOption { test: String, reason: String },
}

#[derive(Default)]
pub struct Registry {
    tests: BTreeMap<String, Arc<dyn NetTest>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every test that passes the checks
    ///
    /// Returns the registry together with the refused tests' errors.
    pub fn with_tests<I>(tests: I) -> (Self, Vec<RegistryError>)
    where
        I: IntoIterator<Item = Arc<dyn NetTest>>,
    {
        let mut registry = Self::new();
        let mut errors = Vec::new();
        for test in tests {
            if let Err(e) = registry.register(test) {
                warn!("Skipping broken test: {}", e);
                errors.push(e);
            }
        }
        (registry, errors)
    }

    pub fn register(&mut self, test: Arc<dyn NetTest>) -> Result<(), RegistryError> {
        let name = test.short_name();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.tests.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        check_options(name, &test.options_spec())?;

        self.tests.insert(name.to_string(), test);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NetTest>> {
        self.tests.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tests.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn NetTest>> {
        self.tests.values()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

fn check_options(test: &str, options: &[OptionSpec]) -> Result<(), RegistryError> {
    let bad = |reason: String| RegistryError::BadOption {
        test: test.to_string(),
        reason,
    };

    let mut longs = HashSet::new();
    let mut shorts = HashSet::new();
    for option in options {
        if option.long.is_empty() || !option.long.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(bad(format!("invalid name {:?}", option.long)));
        }
        if option.long == RESUME_OPTION || option.long == "help" {
            return Err(bad(format!("--{} is reserved", option.long)));
        }
        if !longs.insert(option.long) {
            return Err(bad(format!("--{} declared twice", option.long)));
        }
        if let Some(short) = option.short {
            if !short.is_ascii_alphanumeric() || short == 'h' {
                return Err(bad(format!("invalid short flag -{}", short)));
            }
            if !shorts.insert(short) {
                return Err(bad(format!("-{} declared twice", short)));
            }
        }
        if !option.takes_value && option.default.is_some() {
            return Err(bad(format!("flag --{} cannot have a default", option.long)));
        }
    }
    Ok(())
}
