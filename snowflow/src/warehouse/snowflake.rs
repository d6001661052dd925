//! Snowflake session driver.
//!
//! Speaks the session REST protocol: a login request returns a session token,
//! statements are posted to the query endpoint with positional bindings, and
//! the session is deleted on close. Results use the JSON row format, where
//! every cell arrives as a string and is converted using the column type.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{put_command, BindValue, Connection, Credentials, Driver, Row, Statement};
use crate::errors::WarehouseError;
use crate::storage::{file_name, fs_operator, s3_operator, upload_file, S3Credentials, S3Location};

const CLIENT_APP_ID: &str = "snowflow";
const CONTENT_TYPE_SNOWFLAKE: &str = "application/snowflake";
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Opens Snowflake sessions over HTTPS.
#[derive(Debug, Clone, Default)]
pub struct SnowflakeDriver {
    client: reqwest::Client,
}

impl SnowflakeDriver {
    /// Creates a driver with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver using the given HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Driver for SnowflakeDriver {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Connection>, WarehouseError> {
        let session = SnowflakeSession::login(self.client.clone(), credentials).await?;
        Ok(Box::new(session))
    }
}

/// Base URL for an account, honouring host/protocol/port overrides.
fn base_url(credentials: &Credentials) -> String {
    let protocol = credentials.protocol.as_deref().unwrap_or("https");
    let host = credentials
        .host
        .clone()
        .unwrap_or_else(|| format!("{}.snowflakecomputing.com", credentials.account));
    match credentials.port {
        Some(port) => format!("{protocol}://{host}:{port}"),
        None => format!("{protocol}://{host}"),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl Envelope {
    fn code(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    fn in_progress(&self) -> bool {
        matches!(
            self.code().as_deref(),
            Some(QUERY_IN_PROGRESS | QUERY_IN_PROGRESS_ASYNC)
        )
    }

    fn into_data<T: DeserializeOwned>(self) -> Result<T, WarehouseError> {
        if !self.success {
            return Err(WarehouseError::statement(
                self.code().unwrap_or_default(),
                self.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        let data = self.data.unwrap_or_else(|| json!({}));
        serde_json::from_value(data).map_err(|e| WarehouseError::protocol(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<ColumnMeta>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    stage_info: Option<StageInfo>,
    #[serde(default)]
    encryption_material: Option<Value>,
}

impl QueryData {
    // Multi-file PUTs answer with one entry per file, null when unencrypted.
    fn requires_encryption(&self) -> bool {
        match &self.encryption_material {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => items.iter().any(|item| !item.is_null()),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageInfo {
    location_type: String,
    location: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    end_point: Option<String>,
    #[serde(default)]
    creds: HashMap<String, Value>,
}

impl StageInfo {
    fn cred(&self, key: &str) -> Option<String> {
        self.creds
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn operator(&self) -> Result<opendal::Operator, WarehouseError> {
        match self.location_type.to_ascii_uppercase().as_str() {
            "S3" => {
                let (bucket, prefix) = self
                    .location
                    .split_once('/')
                    .unwrap_or((self.location.as_str(), ""));
                let location = S3Location {
                    bucket: bucket.to_string(),
                    root: (!prefix.is_empty()).then(|| prefix.to_string()),
                    region: self.region.clone(),
                    endpoint: self.end_point.as_ref().map(|e| format!("https://{e}")),
                };
                let creds = S3Credentials {
                    access_key_id: self.cred("AWS_KEY_ID"),
                    secret_access_key: self.cred("AWS_SECRET_KEY"),
                    session_token: self.cred("AWS_TOKEN"),
                };
                Ok(s3_operator(&location, &creds)?)
            }
            "LOCAL_FS" => Ok(fs_operator(&self.location)?),
            other => Err(WarehouseError::UnsupportedStage(other.to_string())),
        }
    }
}

fn bindings(binds: &[BindValue]) -> Value {
    let mut map = Map::new();
    for (index, bind) in binds.iter().enumerate() {
        let (kind, value) = match bind {
            BindValue::Null => ("TEXT", Value::Null),
            BindValue::Text(s) => ("TEXT", json!(s)),
            BindValue::Integer(n) => ("FIXED", json!(n.to_string())),
            BindValue::Float(f) => ("REAL", json!(f.to_string())),
            BindValue::Boolean(b) => ("BOOLEAN", json!(b.to_string())),
        };
        map.insert(
            (index + 1).to_string(),
            json!({ "type": kind, "value": value }),
        );
    }
    Value::Object(map)
}

fn convert_cell(column: &ColumnMeta, cell: &Value) -> Value {
    let Some(text) = cell.as_str() else {
        return cell.clone();
    };
    let as_string = || Value::String(text.to_string());
    let as_float = || {
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(as_string, Value::Number)
    };

    match column.kind.to_ascii_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => text
            .parse::<i64>()
            .map_or_else(|_| as_float(), Value::from),
        "fixed" | "real" => as_float(),
        "boolean" => Value::Bool(matches!(text, "1" | "true" | "TRUE")),
        "variant" | "object" | "array" => {
            serde_json::from_str(text).unwrap_or_else(|_| as_string())
        }
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => epoch_to_timestamp(text)
            .map_or_else(as_string, Value::String),
        "date" => text
            .parse::<i64>()
            .ok()
            .and_then(TimeDelta::try_days)
            .and_then(|delta| NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(delta))
            .map_or_else(as_string, |d| Value::String(d.to_string())),
        _ => as_string(),
    }
}

/// Converts `"<seconds>.<fraction>[ <tz>]"` into `YYYY-MM-DD HH:MM:SS.ffffff`.
fn epoch_to_timestamp(text: &str) -> Option<String> {
    let epoch = text.split_whitespace().next()?;
    let (secs, frac) = epoch.split_once('.').unwrap_or((epoch, "0"));
    let secs: i64 = secs.parse().ok()?;
    let nanos: u32 = format!("{frac:0<9}").get(..9)?.parse().ok()?;
    let ts = DateTime::from_timestamp(secs, nanos)?;
    Some(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
}

fn rows_from(data: &QueryData) -> Vec<Row> {
    data.rowset
        .iter()
        .map(|cells| {
            data.rowtype
                .iter()
                .zip(cells)
                .map(|(column, cell)| (column.name.clone(), convert_cell(column, cell)))
                .collect()
        })
        .collect()
}

struct SnowflakeSession {
    client: reqwest::Client,
    base_url: String,
    token: String,
    sequence: u64,
    closed: bool,
}

impl SnowflakeSession {
    async fn login(client: reqwest::Client, credentials: &Credentials) -> Result<Self, WarehouseError> {
        let base_url = base_url(credentials);
        let mut query = vec![("requestId", Uuid::new_v4().to_string())];
        let optional = [
            ("warehouse", &credentials.warehouse),
            ("databaseName", &credentials.database),
            ("schemaName", &credentials.schema),
            ("roleName", &credentials.role),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                query.push((key, value.clone()));
            }
        }

        let account_name = credentials
            .account
            .split('.')
            .next()
            .unwrap_or(&credentials.account)
            .to_uppercase();
        let body = json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": account_name,
                "LOGIN_NAME": credentials.user,
                "PASSWORD": credentials.password,
                "CLIENT_ENVIRONMENT": {
                    "APPLICATION": CLIENT_APP_ID,
                    "OS": std::env::consts::OS,
                },
                "SESSION_PARAMETERS": {
                    "CLIENT_SESSION_KEEP_ALIVE": false,
                },
            }
        });

        debug!(url = %base_url, account = %account_name, "Logging in");
        let envelope: Envelope = client
            .post(format!("{base_url}/session/v1/login-request"))
            .query(&query)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(WarehouseError::Login {
                code: envelope.code(),
                message: envelope.message.unwrap_or_else(|| "login rejected".to_string()),
            });
        }
        let data: LoginData = envelope.into_data()?;

        Ok(Self {
            client,
            base_url,
            token: data.token,
            sequence: 0,
            closed: false,
        })
    }

    fn authorization(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    async fn run(&mut self, statement: &Statement) -> Result<QueryData, WarehouseError> {
        if self.closed {
            return Err(WarehouseError::Closed);
        }
        self.sequence += 1;

        let mut body = json!({
            "sqlText": statement.sql,
            "asyncExec": false,
            "sequenceId": self.sequence,
            "querySubmissionTime": chrono::Utc::now().timestamp_millis(),
        });
        if !statement.binds.is_empty() {
            body["bindings"] = bindings(&statement.binds);
        }

        let mut envelope: Envelope = self
            .client
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, CONTENT_TYPE_SNOWFLAKE)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        while envelope.in_progress() {
            let result_url = envelope
                .data
                .as_ref()
                .and_then(|d| d.get("getResultUrl"))
                .and_then(Value::as_str)
                .ok_or_else(|| WarehouseError::protocol("query in progress without a result URL"))?
                .to_string();
            tokio::time::sleep(POLL_INTERVAL).await;
            envelope = self
                .client
                .get(format!("{}{result_url}", self.base_url))
                .header(AUTHORIZATION, self.authorization())
                .header(ACCEPT, CONTENT_TYPE_SNOWFLAKE)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
        }

        envelope.into_data()
    }
}

#[async_trait]
impl Connection for SnowflakeSession {
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, WarehouseError> {
        let data = self.run(statement).await?;
        Ok(rows_from(&data))
    }

    async fn put_file(&mut self, local_path: &Path, stage: &str) -> Result<(), WarehouseError> {
        let data = self.run(&Statement::new(put_command(local_path, stage))).await?;
        if data.command.as_deref() != Some("UPLOAD") {
            return Err(WarehouseError::protocol(format!(
                "expected an UPLOAD instruction, got {:?}",
                data.command
            )));
        }
        if data.requires_encryption() {
            return Err(WarehouseError::EncryptedStage(stage.to_string()));
        }
        let stage_info = data
            .stage_info
            .ok_or_else(|| WarehouseError::protocol("PUT response without stageInfo"))?;
        let key = file_name(local_path).ok_or_else(|| {
            WarehouseError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", local_path.display()),
            ))
        })?;

        let op = stage_info.operator()?;
        upload_file::<WarehouseError>(&op, local_path, &key).await?;
        debug!(stage, key = %key, location_type = %stage_info.location_type, "Staged file");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        self.run(&Statement::new("COMMIT")).await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        self.run(&Statement::new("ROLLBACK")).await.map(|_| ())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<(), WarehouseError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .query(&[("delete", "true".to_string()), ("requestId", Uuid::new_v4().to_string())])
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, CONTENT_TYPE_SNOWFLAKE)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Session delete was not acknowledged");
        }
        Ok(())
    }
}
