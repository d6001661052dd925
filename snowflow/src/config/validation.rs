//! Configuration validation.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::PipelineConfig;
use crate::errors::ConfigError;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*){0,2}$")
        .expect("valid identifier regex")
});

/// Returns true if `name` is a plain, optionally qualified, SQL identifier
/// (`TABLE`, `SCHEMA.TABLE` or `DB.SCHEMA.TABLE`).
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

fn check_identifier(key: &str, value: &str) -> Result<(), ConfigError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            key,
            format!("{value:?} is not a valid SQL identifier"),
        ))
    }
}

pub(super) fn validate(config: &PipelineConfig) -> Result<(), ConfigError> {
    let api = &config.api_ingestion;
    let rate = &api.rate_limit;

    if !(rate.requests_per_second.is_finite() && rate.requests_per_second > 0.0) {
        return Err(ConfigError::invalid(
            "api_ingestion.rate_limit.requests_per_second",
            "must be greater than zero",
        ));
    }
    if rate.retry_attempts == 0 {
        return Err(ConfigError::invalid(
            "api_ingestion.rate_limit.retry_attempts",
            "must be at least 1",
        ));
    }
    if !(rate.retry_delay.is_finite() && rate.retry_delay >= 0.0) {
        return Err(ConfigError::invalid(
            "api_ingestion.rate_limit.retry_delay",
            "must be zero or positive",
        ));
    }
    if rate.retry_delay > 300.0 {
        warn!(
            retry_delay = rate.retry_delay,
            "retry_delay is over five minutes; failed fetches will stall the run"
        );
    }
    if !(api.timeout_seconds.is_finite() && api.timeout_seconds > 0.0) {
        return Err(ConfigError::invalid(
            "api_ingestion.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let mut seen = HashSet::new();
    for (i, endpoint) in api.endpoints.iter().enumerate() {
        let key = format!("api_ingestion.endpoints[{i}]");
        if endpoint.name.is_empty() {
            return Err(ConfigError::invalid(format!("{key}.name"), "must not be empty"));
        }
        if !seen.insert(endpoint.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("{key}.name"),
                format!("duplicate endpoint name {:?}", endpoint.name),
            ));
        }
        if endpoint.url.is_empty() {
            return Err(ConfigError::invalid(format!("{key}.url"), "must not be empty"));
        }
        if reqwest::Method::from_bytes(endpoint.method.to_uppercase().as_bytes()).is_err() {
            return Err(ConfigError::invalid(
                format!("{key}.method"),
                format!("{:?} is not an HTTP method", endpoint.method),
            ));
        }
        check_identifier(&format!("{key}.target_table"), &endpoint.target_table)?;
    }

    check_identifier("file_ingestion.stage", &config.file_ingestion.stage)?;
    check_identifier("file_ingestion.pipe", &config.file_ingestion.pipe)?;

    let t = &config.transformation;
    check_identifier("transformation.source_table", &t.source_table)?;
    check_identifier("transformation.cleaned_table", &t.cleaned_table)?;
    check_identifier("transformation.final_table", &t.final_table)?;
    if t.dedup_columns.is_empty() {
        warn!("transformation.dedup_columns is empty; duplicate removal keys on nothing");
    }

    let v = &config.validation;
    check_identifier("validation.target_table", &v.target_table)?;
    check_identifier("validation.results_table", &v.results_table)?;
    check_identifier("validation.log_table", &v.log_table)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("FILE_STAGE"));
        assert!(is_identifier("RAW.API_USERS"));
        assert!(is_identifier("DATA_PIPELINE_DB.RAW.API_USERS"));
        assert!(is_identifier("_tmp$1"));

        assert!(!is_identifier(""));
        assert!(!is_identifier("1TABLE"));
        assert!(!is_identifier("A.B.C.D"));
        assert!(!is_identifier("users; DROP TABLE x"));
        assert!(!is_identifier("RAW."));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_rate() {
        let mut config = PipelineConfig::default();
        config.api_ingestion.rate_limit.requests_per_second = 0.0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("requests_per_second"));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = PipelineConfig::default();
        config.api_ingestion.rate_limit.retry_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_duplicate_endpoints() {
        let mut config = PipelineConfig::default();
        config.api_ingestion.endpoints = vec![
            EndpointConfig::new("users", "http://a", "RAW.USERS"),
            EndpointConfig::new("users", "http://b", "RAW.USERS2"),
        ];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_unsafe_target_table() {
        let mut config = PipelineConfig::default();
        config.api_ingestion.endpoints =
            vec![EndpointConfig::new("users", "http://a", "RAW.USERS; DROP TABLE X")];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("target_table"));
    }

    #[test]
    fn test_rejects_bad_method() {
        let mut config = PipelineConfig::default();
        let mut endpoint = EndpointConfig::new("users", "http://a", "RAW.USERS");
        endpoint.method = "GE T".to_string();
        config.api_ingestion.endpoints = vec![endpoint];
        assert!(validate(&config).is_err());
    }
}
