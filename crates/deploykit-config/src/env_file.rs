//! `.env`-style environment loading and required-variable validation.
//!
//! Values already present in the process environment win over the file, so
//! operators can override a checked-in `.env` per invocation. Validation
//! reports every missing name at once, before anything mutates.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Variables required for any deployment.
pub const REQUIRED: &[&str] = &[
    "COVEO_ORG_ID",
    "COVEO_SEARCH_API_KEY",
    "COVEO_ANSWER_CONFIG_ID",
    "AWS_REGION",
];

/// Additional variables required in multi-account mode.
pub const REQUIRED_MULTI_ACCOUNT: &[&str] = &["OU_ID", "MASTER_ACCOUNT_ID"];

/// Flattened view of the configuration environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: BTreeMap<String, String>,
}

impl Environment {
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Get a required variable; validation should have run first, so a miss
    /// here is a programming error surfaced as a config error, not a panic.
    pub fn require(&self, name: &str) -> ConfigResult<&str> {
        self.get(name)
            .ok_or_else(|| ConfigError::MissingVariables(vec![name.to_string()]))
    }

    /// Check that every required variable is present and non-empty,
    /// collecting all misses into a single error.
    pub fn validate(&self, multi_account: bool) -> ConfigResult<()> {
        let mut missing: Vec<String> = Vec::new();
        let mut check = |names: &[&str]| {
            for name in names {
                match self.get(name) {
                    Some(v) if !v.trim().is_empty() => {}
                    _ => missing.push(name.to_string()),
                }
            }
        };
        check(REQUIRED);
        if multi_account {
            check(REQUIRED_MULTI_ACCOUNT);
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingVariables(missing))
        }
    }
}

/// Load the environment: the file first (if present), then process
/// environment variables on top.
pub fn load_environment(env_file: Option<&Path>) -> ConfigResult<Environment> {
    let mut values = BTreeMap::new();

    if let Some(path) = env_file {
        for item in dotenvy::from_path_iter(path)? {
            let (key, value) = item?;
            values.insert(key, value);
        }
    }

    for (key, value) in std::env::vars() {
        values.insert(key, value);
    }

    Ok(Environment::from_map(values))
}
