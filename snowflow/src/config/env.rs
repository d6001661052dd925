//! Environment lookups.
//!
//! Credentials and tokens are resolved at the point of use: an environment
//! variable wins over the configuration file value, and an empty variable
//! counts as unset.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::errors::ConfigError;

/// Snowflake account identifier.
pub const SNOWFLAKE_ACCOUNT: &str = "SNOWFLAKE_ACCOUNT";
/// Snowflake login name.
pub const SNOWFLAKE_USER: &str = "SNOWFLAKE_USER";
/// Snowflake password.
pub const SNOWFLAKE_PASSWORD: &str = "SNOWFLAKE_PASSWORD";
/// Bearer token for `auth_type: bearer` endpoints.
pub const API_BEARER_TOKEN: &str = "API_BEARER_TOKEN";
/// Key for `auth_type: api_key` endpoints.
pub const API_KEY: &str = "API_KEY";
/// AWS access key used for object-store uploads.
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
/// AWS secret key used for object-store uploads.
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
/// AWS region used for object-store uploads.
pub const AWS_REGION: &str = "AWS_REGION";
/// Log level override.
pub const SNOWFLOW_LOG_LEVEL: &str = "SNOWFLOW_LOG_LEVEL";
/// Log format override (`text` or `json`).
pub const SNOWFLOW_LOG_FORMAT: &str = "SNOWFLOW_LOG_FORMAT";

/// A source of environment variables.
pub trait EnvSource: Send + Sync {
    /// Returns the value of `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed set of variables, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Shared handle to an environment source.
pub type SharedEnv = Arc<dyn EnvSource>;

/// Returns a shared handle to the process environment.
#[must_use]
pub fn process_env() -> SharedEnv {
    Arc::new(ProcessEnv)
}

/// Resolves a setting: the environment variable `var` if non-empty, else the
/// non-empty configuration value.
#[must_use]
pub fn resolve(env: &dyn EnvSource, var: &str, config_value: Option<&str>) -> Option<String> {
    env.get(var)
        .filter(|v| !v.is_empty())
        .or_else(|| config_value.filter(|v| !v.is_empty()).map(str::to_string))
}

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex")
});

/// Substitutes `${VAR_NAME}` patterns with values from `env`.
///
/// YAML comments are copied through untouched. Every missing variable is
/// reported in a single error.
pub fn substitute_env_vars(input: &str, env: &dyn EnvSource) -> Result<String, ConfigError> {
    let mut missing = Vec::new();
    let mut output = String::with_capacity(input.len());

    for line in input.split_inclusive('\n') {
        let (content, comment) = line.split_at(comment_start(line).unwrap_or(line.len()));
        let replaced = ENV_VAR_RE.replace_all(content, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            env.get(name).unwrap_or_else(|| {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            })
        });
        output.push_str(&replaced);
        output.push_str(comment);
    }

    if missing.is_empty() {
        Ok(output)
    } else {
        Err(ConfigError::MissingEnv(missing))
    }
}

/// Byte offset of a `#` comment: outside quotes, at line start or after whitespace.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote = None;
    let mut prev = None;
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '#' && prev.map_or(true, char::is_whitespace) => return Some(i),
            None => {}
        }
        prev = Some(c);
    }
    None
}
