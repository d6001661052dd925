//! REST API ingestion.
//!
//! Each enabled endpoint is fetched with its configured method, headers,
//! query parameters and auth, paced and retried with a fixed delay, then
//! normalized into a list of records and loaded into its target table.
//! Failures are logged and reported as `false`/`None`, never raised.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::loader::load_records;
use super::retry::RetryPolicy;
use crate::config::{
    resolve, ApiIngestionConfig, AuthType, EndpointConfig, SharedEnv, API_BEARER_TOKEN, API_KEY,
};
use crate::errors::{Result, SnowflowError};
use crate::orchestrator::api_run_tag;
use crate::utils::now_utc;
use crate::warehouse::Connector;

/// Header carrying the key for `api_key` auth.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Result of ingesting one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReport {
    /// Endpoint name.
    pub name: String,
    /// Whether records were fetched and loaded.
    pub success: bool,
    /// Rows inserted.
    pub rows_loaded: usize,
}

impl EndpointReport {
    fn failed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            rows_loaded: 0,
        }
    }
}

/// Normalizes a decoded response body into a list of records.
///
/// Arrays are returned as-is. Objects yield their `data` member, else their
/// `results` member (a non-array member becomes a one-element list), else
/// the object itself. Anything else is wrapped as `{"raw_data": "<text>"}`.
#[must_use]
pub fn normalize_response(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["data", "results"] {
                if let Some(inner) = map.remove(key) {
                    return match inner {
                        Value::Array(items) => items,
                        other => vec![other],
                    };
                }
            }
            vec![Value::Object(map)]
        }
        Value::String(text) => vec![json!({ "raw_data": text })],
        other => vec![json!({ "raw_data": other.to_string() })],
    }
}

fn query_pairs(endpoint: &EndpointConfig) -> Vec<(String, String)> {
    endpoint
        .params
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

/// Fetches API endpoints and loads their records.
pub struct ApiIngestion {
    config: ApiIngestionConfig,
    connector: Connector,
    env: SharedEnv,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ApiIngestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiIngestion")
            .field("endpoints", &self.config.endpoints.len())
            .field("retry", &self.retry)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl ApiIngestion {
    /// Creates an ingestion client with its own connector.
    pub fn new(config: ApiIngestionConfig, connector: Connector, env: SharedEnv) -> Result<Self> {
        let timeout = Duration::try_from_secs_f64(config.timeout_seconds)
            .unwrap_or(Duration::from_secs(30));
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let retry = RetryPolicy::from(&config.rate_limit);
        Ok(Self {
            config,
            connector,
            env,
            client,
            retry,
        })
    }

    /// Overrides the retry policy derived from the rate-limit settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The ingestion settings.
    #[must_use]
    pub fn config(&self) -> &ApiIngestionConfig {
        &self.config
    }

    /// Builds the request headers: static headers plus auth.
    #[must_use]
    pub fn request_headers(&self, endpoint: &EndpointConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &endpoint.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(endpoint = %endpoint.name, header = %name, "Skipping invalid header"),
            }
        }

        let env = self.env.as_ref();
        let auth = match endpoint.auth_type {
            AuthType::Bearer => {
                let token = resolve(env, API_BEARER_TOKEN, endpoint.bearer_token.as_deref())
                    .unwrap_or_default();
                Some((AUTHORIZATION, format!("Bearer {token}")))
            }
            AuthType::ApiKey => {
                let key = resolve(env, API_KEY, endpoint.api_key.as_deref()).unwrap_or_default();
                Some((HeaderName::from_static("x-api-key"), key))
            }
            AuthType::Basic | AuthType::None => None,
        };
        if let Some((name, value)) = auth {
            match HeaderValue::from_str(&value) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(name, value);
                }
                Err(_) => warn!(endpoint = %endpoint.name, "Credential is not a valid header value"),
            }
        }
        headers
    }

    /// Fetches one endpoint and normalizes the response.
    ///
    /// Transport errors, error statuses and undecodable bodies are retried.
    /// Returns `None` once every attempt has failed.
    pub async fn fetch_endpoint(&self, endpoint: &EndpointConfig) -> Option<Vec<Value>> {
        let Ok(method) = Method::from_bytes(endpoint.method.to_uppercase().as_bytes()) else {
            error!(endpoint = %endpoint.name, method = %endpoint.method, "Invalid HTTP method");
            return None;
        };
        let headers = self.request_headers(endpoint);
        let params = query_pairs(endpoint);

        let body = self
            .retry
            .run(&endpoint.name, |attempt| {
                let request = self
                    .client
                    .request(method.clone(), &endpoint.url)
                    .headers(headers.clone())
                    .query(&params);
                async move {
                    debug!(attempt, "Sending request");
                    let response = request.send().await?.error_for_status()?;
                    response.json::<Value>().await
                }
            })
            .await?;

        let records = normalize_response(body);
        info!(endpoint = %endpoint.name, records = records.len(), "Fetched records");
        Some(records)
    }

    /// Loads fetched records; absent or empty input is a failure.
    ///
    /// Returns the number of rows inserted, or `None` on failure.
    pub async fn load_records(
        &mut self,
        records: Option<&[Value]>,
        target_table: &str,
        run_tag: &str,
    ) -> Option<usize> {
        let Some(records) = records.filter(|r| !r.is_empty()) else {
            warn!(table = target_table, "No data to load");
            return None;
        };

        match load_records(&mut self.connector, records, target_table, run_tag).await {
            Ok(rows) => {
                info!(table = target_table, rows, run_tag, "Loaded records");
                Some(rows)
            }
            Err(err) => {
                error!(table = target_table, error = %err, "Failed to load records");
                None
            }
        }
    }

    /// Ingests one enabled endpoint by name.
    pub async fn ingest_endpoint(&mut self, name: &str) -> bool {
        self.ingest_endpoint_report(name).await.success
    }

    /// Ingests one enabled endpoint by name and reports the row count.
    pub async fn ingest_endpoint_report(&mut self, name: &str) -> EndpointReport {
        let Some(endpoint) = self.config.enabled_endpoint(name).cloned() else {
            let err = SnowflowError::EndpointNotFound {
                name: name.to_string(),
            };
            error!(error = %err, "Skipping endpoint");
            return EndpointReport::failed(name);
        };

        let run_tag = api_run_tag(name, &now_utc());
        info!(endpoint = name, run_tag = %run_tag, "Starting ingestion");

        let records = self.fetch_endpoint(&endpoint).await;
        match self
            .load_records(records.as_deref(), &endpoint.target_table, &run_tag)
            .await
        {
            Some(rows_loaded) => EndpointReport {
                name: name.to_string(),
                success: true,
                rows_loaded,
            },
            None => EndpointReport::failed(name),
        }
    }

    /// Ingests every enabled endpoint in declaration order.
    ///
    /// Endpoints are independent: one failing does not stop the rest.
    pub async fn ingest_all_endpoints(&mut self) -> Vec<EndpointReport> {
        let names: Vec<String> = self
            .config
            .enabled_endpoints()
            .map(|e| e.name.clone())
            .collect();

        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(self.ingest_endpoint_report(&name).await);
        }

        let succeeded = reports.iter().filter(|r| r.success).count();
        info!(succeeded, total = reports.len(), "API ingestion finished");
        reports
    }

    /// Closes the ingestion connector.
    pub async fn close(&mut self) -> Result<()> {
        self.connector.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MapEnv, RateLimitConfig};
    use crate::testing::RecordingDriver;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoints: Vec<EndpointConfig>) -> ApiIngestionConfig {
        ApiIngestionConfig {
            rate_limit: RateLimitConfig {
                requests_per_second: 1000.0,
                retry_attempts: 3,
                retry_delay: 0.0,
            },
            timeout_seconds: 5.0,
            endpoints,
        }
    }

    fn ingestion(
        driver: &RecordingDriver,
        endpoints: Vec<EndpointConfig>,
        env: MapEnv,
    ) -> ApiIngestion {
        ApiIngestion::new(config(endpoints), driver.connector(), Arc::new(env)).unwrap()
    }

    #[test]
    fn test_normalize_array() {
        assert_eq!(
            normalize_response(json!([{"a": 1}, {"a": 2}])),
            vec![json!({"a": 1}), json!({"a": 2})]
        );
    }

    #[test]
    fn test_normalize_data_key() {
        assert_eq!(
            normalize_response(json!({"data": [{"a": 1}], "results": [1, 2]})),
            vec![json!({"a": 1})]
        );
        assert_eq!(
            normalize_response(json!({"data": {"a": 1}})),
            vec![json!({"a": 1})]
        );
    }

    #[test]
    fn test_normalize_results_key() {
        assert_eq!(
            normalize_response(json!({"results": [{"b": 2}], "count": 1})),
            vec![json!({"b": 2})]
        );
    }

    #[test]
    fn test_normalize_plain_object_and_scalars() {
        assert_eq!(
            normalize_response(json!({"id": 7})),
            vec![json!({"id": 7})]
        );
        assert_eq!(
            normalize_response(json!("hello")),
            vec![json!({"raw_data": "hello"})]
        );
        assert_eq!(normalize_response(json!(42)), vec![json!({"raw_data": "42"})]);
        assert_eq!(normalize_response(json!([])), Vec::<Value>::new());
    }

    #[test]
    fn test_auth_headers() {
        let driver = RecordingDriver::new();
        let env = MapEnv::new().with(API_KEY, "env-key");
        let api = ingestion(&driver, vec![], env);

        let bearer = EndpointConfig::new("b", "http://x", "RAW.B")
            .with_auth(AuthType::Bearer)
            .with_bearer_token("cfg-token");
        let headers = api.request_headers(&bearer);
        assert_eq!(headers[AUTHORIZATION], "Bearer cfg-token");

        let keyed = EndpointConfig::new("k", "http://x", "RAW.K")
            .with_auth(AuthType::ApiKey)
            .with_header("Accept", "application/json");
        let headers = api.request_headers(&keyed);
        assert_eq!(headers[API_KEY_HEADER], "env-key");
        assert_eq!(headers["accept"], "application/json");

        let basic = EndpointConfig::new("n", "http://x", "RAW.N").with_auth(AuthType::Basic);
        assert!(api.request_headers(&basic).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_sends_params_and_bearer_from_env() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("page", "1"))
            .and(query_param("status", "active"))
            .and(header("authorization", "Bearer env-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 1}, {"id": 2}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let endpoint = EndpointConfig::new("users", format!("{}/users", server.uri()), "RAW.USERS")
            .with_auth(AuthType::Bearer)
            .with_bearer_token("cfg-token")
            .with_param("page", 1)
            .with_param("status", "active");
        let api = ingestion(
            &driver,
            vec![endpoint.clone()],
            MapEnv::new().with(API_BEARER_TOKEN, "env-token"),
        );

        let records = api.fetch_endpoint(&endpoint).await.unwrap();
        assert_eq!(records, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_fetch_exhausts_retries_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let endpoint = EndpointConfig::new("flaky", format!("{}/flaky", server.uri()), "RAW.F");
        let api = ingestion(&driver, vec![endpoint.clone()], MapEnv::new());

        assert!(api.fetch_endpoint(&endpoint).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_retries_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(3)
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let endpoint = EndpointConfig::new("html", format!("{}/html", server.uri()), "RAW.H");
        let api = ingestion(&driver, vec![endpoint.clone()], MapEnv::new());

        assert!(api.fetch_endpoint(&endpoint).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_list_is_distinct_from_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let endpoint = EndpointConfig::new("empty", format!("{}/empty", server.uri()), "RAW.E");
        let mut api = ingestion(&driver, vec![endpoint.clone()], MapEnv::new());

        assert_eq!(api.fetch_endpoint(&endpoint).await, Some(vec![]));
        assert!(!api.ingest_endpoint("empty").await);
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_endpoints_make_no_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"a": 1}])))
            .expect(0)
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let disabled = EndpointConfig::new("off", format!("{}/off", server.uri()), "RAW.OFF")
            .with_enabled(false);
        let mut api = ingestion(&driver, vec![disabled], MapEnv::new());

        assert!(!api.ingest_endpoint("off").await);
        assert!(!api.ingest_endpoint("nope").await);
        assert!(api.ingest_all_endpoints().await.is_empty());
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn test_ingest_endpoint_loads_augmented_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": [{"id": 1}, {"id": 2}]})),
            )
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let endpoint = EndpointConfig::new("users", format!("{}/users", server.uri()), "RAW.USERS");
        let mut api = ingestion(&driver, vec![endpoint], MapEnv::new());

        let report = api.ingest_endpoint_report("users").await;
        assert!(report.success);
        assert_eq!(report.rows_loaded, 2);

        let sql = driver.executed_sql();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with("CREATE TABLE IF NOT EXISTS RAW.USERS"));
        assert_eq!(sql[1], "BEGIN");
        assert!(sql[2].starts_with("INSERT INTO RAW.USERS"));
        assert_eq!(driver.commits(), 1);

        let insert = &driver.statements()[2];
        assert_eq!(insert.binds.len(), 8);
        let payload: Value = serde_json::from_str(insert.binds[0].as_text().unwrap()).unwrap();
        assert_eq!(payload["id"], json!(1));
        assert_eq!(payload["source"], json!("API"));
        assert!(payload["run_id"].as_str().unwrap().starts_with("API_users_"));
    }

    #[tokio::test]
    async fn test_load_failure_rolls_back_and_reports_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let driver = RecordingDriver::new().fail("INSERT INTO", "Numeric value out of range");
        let endpoint = EndpointConfig::new("users", format!("{}/users", server.uri()), "RAW.USERS");
        let mut api = ingestion(&driver, vec![endpoint], MapEnv::new());

        assert!(!api.ingest_endpoint("users").await);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
    }

    #[tokio::test]
    async fn test_ingest_all_is_independent_and_ordered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"ok": true}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let driver = RecordingDriver::new();
        let endpoints = vec![
            EndpointConfig::new("bad", format!("{}/bad", server.uri()), "RAW.BAD"),
            EndpointConfig::new("good", format!("{}/good", server.uri()), "RAW.GOOD"),
        ];
        let mut api = ingestion(&driver, endpoints, MapEnv::new());

        let reports = api.ingest_all_endpoints().await;
        let summary: Vec<_> = reports.iter().map(|r| (r.name.as_str(), r.success)).collect();
        assert_eq!(summary, vec![("bad", false), ("good", true)]);
    }
}
