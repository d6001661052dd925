//! Pipeline configuration.
//!
//! The configuration is a YAML document with one section per component.
//! `${VAR}` placeholders are substituted before parsing, every section has
//! defaults, and [`PipelineConfig::validate`] rejects values the pipeline
//! cannot run with.

mod env;
mod validation;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub use env::{
    process_env, resolve, substitute_env_vars, EnvSource, MapEnv, ProcessEnv, SharedEnv,
    API_BEARER_TOKEN, API_KEY, AWS_ACCESS_KEY_ID, AWS_REGION, AWS_SECRET_ACCESS_KEY,
    SNOWFLAKE_ACCOUNT, SNOWFLAKE_PASSWORD, SNOWFLAKE_USER, SNOWFLOW_LOG_FORMAT,
    SNOWFLOW_LOG_LEVEL,
};
pub use validation::is_identifier;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Warehouse connection settings.
    pub snowflake: SnowflakeConfig,
    /// REST API ingestion.
    pub api_ingestion: ApiIngestionConfig,
    /// File ingestion.
    pub file_ingestion: FileIngestionConfig,
    /// Transformation stage tables.
    pub transformation: TransformationConfig,
    /// Validation stage and run log tables.
    pub validation: ValidationConfig,
    /// Provisioning scripts.
    pub setup: SetupConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Loads, substitutes and validates a configuration file.
    pub fn load(path: impl AsRef<Path>, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content, env)
    }

    /// Parses a configuration document.
    pub fn from_yaml_str(yaml: &str, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(yaml, env)?;
        let mut config: Self = serde_yaml::from_str(&substituted)?;
        config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Applies `SNOWFLOW_LOG_LEVEL` / `SNOWFLOW_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self, env: &dyn EnvSource) {
        if let Some(level) = env.get(SNOWFLOW_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.logging.level = level;
        }
        if let Some(format) = env.get(SNOWFLOW_LOG_FORMAT) {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)
    }
}

/// Warehouse connection settings.
///
/// `account`, `user` and `password` may be left empty here and supplied by
/// `SNOWFLAKE_ACCOUNT`, `SNOWFLAKE_USER` and `SNOWFLAKE_PASSWORD`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowflakeConfig {
    /// Account identifier, e.g. `xy12345.us-east-1`.
    pub account: String,
    /// Login name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Virtual warehouse.
    pub warehouse: Option<String>,
    /// Default database.
    pub database: Option<String>,
    /// Default schema.
    pub schema: Option<String>,
    /// Role.
    pub role: Option<String>,
    /// Host override; defaults to `<account>.snowflakecomputing.com`.
    pub host: Option<String>,
    /// Protocol override; defaults to `https`.
    pub protocol: Option<String>,
    /// Port override.
    pub port: Option<u16>,
}

impl std::fmt::Debug for SnowflakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("port", &self.port)
            .finish()
    }
}

/// REST API ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiIngestionConfig {
    /// Pacing and retry.
    pub rate_limit: RateLimitConfig,
    /// Per-request timeout in seconds.
    pub timeout_seconds: f64,
    /// Endpoints in declaration order.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for ApiIngestionConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            timeout_seconds: 30.0,
            endpoints: Vec::new(),
        }
    }
}

impl ApiIngestionConfig {
    /// Returns the enabled endpoint called `name`.
    #[must_use]
    pub fn enabled_endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name && e.enabled)
    }

    /// Returns enabled endpoints in declaration order.
    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(|e| e.enabled)
    }
}

/// Request pacing and retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per second; the pause before each attempt is the inverse.
    pub requests_per_second: f64,
    /// Total attempts per fetch, including the first.
    pub retry_attempts: u32,
    /// Seconds to wait between attempts.
    pub retry_delay: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            retry_attempts: 3,
            retry_delay: 5.0,
        }
    }
}

/// How an endpoint authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// No credentials.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `X-API-Key: <key>`.
    ApiKey,
    /// Accepted for compatibility; sends no credentials.
    Basic,
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bearer => write!(f, "bearer"),
            Self::ApiKey => write!(f, "api_key"),
            Self::Basic => write!(f, "basic"),
        }
    }
}

/// One REST endpoint to ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique endpoint name.
    pub name: String,
    /// Request URL.
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Authentication strategy.
    #[serde(default)]
    pub auth_type: AuthType,
    /// Static request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Table the records are loaded into.
    pub target_table: String,
    /// Disabled endpoints are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Token used when `API_BEARER_TOKEN` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Key used when `API_KEY` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl EndpointConfig {
    /// Creates an enabled `GET` endpoint without authentication.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_method(),
            auth_type: AuthType::None,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            target_table: target_table.into(),
            enabled: true,
            bearer_token: None,
            api_key: None,
        }
    }

    /// Sets the authentication strategy.
    #[must_use]
    pub fn with_auth(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// Adds a static header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the config-side bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

fn default_method() -> String {
    "GET".to_string()
}

const fn default_true() -> bool {
    true
}

/// File ingestion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIngestionConfig {
    /// Stage files are uploaded to.
    pub stage: String,
    /// Pipe refreshed after an upload.
    pub pipe: String,
    /// Object-store settings for direct uploads.
    pub s3: ObjectStoreConfig,
}

impl Default for FileIngestionConfig {
    fn default() -> Self {
        Self {
            stage: "FILE_STAGE".to_string(),
            pipe: "FILE_INGESTION_PIPE".to_string(),
            s3: ObjectStoreConfig::default(),
        }
    }
}

/// Object-store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Region; `AWS_REGION` wins when set.
    pub region: Option<String>,
    /// Custom endpoint, for S3-compatible stores.
    pub endpoint: Option<String>,
}

/// Tables passed to the transformation procedures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationConfig {
    /// Raw input table.
    pub source_table: String,
    /// Cleaned intermediate table.
    pub cleaned_table: String,
    /// Final analytics table.
    pub final_table: String,
    /// Columns that identify duplicates.
    pub dedup_columns: Vec<String>,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            source_table: "RAW.FILE_INGESTION_STAGING".to_string(),
            cleaned_table: "CLEANED.CLEANED_DATA".to_string(),
            final_table: "ANALYTICS.FINAL_DATA".to_string(),
            dedup_columns: vec!["column1".to_string(), "column2".to_string()],
        }
    }
}

/// Validation and run-log tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Table the validations run against.
    pub target_table: String,
    /// Table the validation procedures write results to.
    pub results_table: String,
    /// Run log table.
    pub log_table: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            target_table: "ANALYTICS.FINAL_DATA".to_string(),
            results_table: "VALIDATION.VALIDATION_RESULTS".to_string(),
            log_table: "VALIDATION.PIPELINE_LOGS".to_string(),
        }
    }
}

/// Provisioning scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Directory holding the scripts.
    pub sql_dir: PathBuf,
    /// Script file names, executed in order.
    pub files: Vec<String>,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            sql_dir: PathBuf::from("sql"),
            files: [
                "01_setup_warehouse.sql",
                "02_setup_database_schema.sql",
                "03_setup_file_formats.sql",
                "04_setup_external_stage.sql",
                "05_setup_snowpipe.sql",
                "06_setup_validation_tables.sql",
                "07_transformation_procedures.sql",
                "08_validation_procedures.sql",
                "10_orchestration_procedures.sql",
                "09_setup_tasks.sql",
                "11_performance_optimization.sql",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r"
snowflake:
  account: ${TEST_SF_ACCOUNT}
  user: loader
  password: ''
  warehouse: DATA_PIPELINE_WH
  database: DATA_PIPELINE_DB
  schema: RAW
api_ingestion:
  rate_limit:
    requests_per_second: 2
    retry_attempts: 4
  endpoints:
    - name: users
      url: https://api.example.com/users
      target_table: RAW.API_USERS
      auth_type: bearer
      params:
        page: 1
        active: true
    - name: orders
      url: https://api.example.com/orders
      method: POST
      target_table: RAW.API_ORDERS
      enabled: false
";

    fn env() -> MapEnv {
        MapEnv::new().with("TEST_SF_ACCOUNT", "xy12345")
    }

    #[test]
    fn test_parse_sample() {
        let config = PipelineConfig::from_yaml_str(SAMPLE, &env()).unwrap();

        assert_eq!(config.snowflake.account, "xy12345");
        assert_eq!(config.snowflake.warehouse.as_deref(), Some("DATA_PIPELINE_WH"));
        assert!(config.snowflake.role.is_none());

        let rate = &config.api_ingestion.rate_limit;
        assert!((rate.requests_per_second - 2.0).abs() < f64::EPSILON);
        assert_eq!(rate.retry_attempts, 4);
        assert!((rate.retry_delay - 5.0).abs() < f64::EPSILON);
        assert!((config.api_ingestion.timeout_seconds - 30.0).abs() < f64::EPSILON);

        let users = &config.api_ingestion.endpoints[0];
        assert_eq!(users.method, "GET");
        assert_eq!(users.auth_type, AuthType::Bearer);
        assert!(users.enabled);
        assert_eq!(users.params["page"], serde_json::json!(1));

        let orders = &config.api_ingestion.endpoints[1];
        assert_eq!(orders.method, "POST");
        assert_eq!(orders.auth_type, AuthType::None);
        assert!(!orders.enabled);
    }

    #[test]
    fn test_enabled_lookup_skips_disabled() {
        let config = PipelineConfig::from_yaml_str(SAMPLE, &env()).unwrap();
        assert!(config.api_ingestion.enabled_endpoint("users").is_some());
        assert!(config.api_ingestion.enabled_endpoint("orders").is_none());
        assert!(config.api_ingestion.enabled_endpoint("missing").is_none());

        let names: Vec<_> = config
            .api_ingestion
            .enabled_endpoints()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["users"]);
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config = PipelineConfig::from_yaml_str("{}", &MapEnv::new()).unwrap();

        assert_eq!(config.file_ingestion.stage, "FILE_STAGE");
        assert_eq!(config.file_ingestion.pipe, "FILE_INGESTION_PIPE");
        assert_eq!(config.transformation.source_table, "RAW.FILE_INGESTION_STAGING");
        assert_eq!(config.transformation.dedup_columns, vec!["column1", "column2"]);
        assert_eq!(config.validation.log_table, "VALIDATION.PIPELINE_LOGS");
        assert_eq!(config.setup.files.len(), 11);
        assert_eq!(config.setup.files[8], "10_orchestration_procedures.sql");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_missing_placeholder_is_an_error() {
        let err = PipelineConfig::from_yaml_str(SAMPLE, &MapEnv::new()).unwrap_err();
        assert!(err.to_string().contains("TEST_SF_ACCOUNT"));
    }

    #[test]
    fn test_log_overrides() {
        let env = env()
            .with(SNOWFLOW_LOG_LEVEL, "debug")
            .with(SNOWFLOW_LOG_FORMAT, "JSON");
        let config = PipelineConfig::from_yaml_str(SAMPLE, &env).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = PipelineConfig::load(&path, &env()).unwrap();
        assert_eq!(config.api_ingestion.endpoints.len(), 2);

        let err = PipelineConfig::load(dir.path().join("absent.yaml"), &env()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SnowflakeConfig {
            password: "hunter2".to_string(),
            ..SnowflakeConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
    }
}
