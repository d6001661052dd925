//! File ingestion: stage uploads, pipe refreshes and direct object-store
//! uploads.

use std::path::Path;

use serde_json::Value;
use tracing::{error, info};

use crate::config::{
    is_identifier, resolve, FileIngestionConfig, SharedEnv, AWS_ACCESS_KEY_ID, AWS_REGION,
    AWS_SECRET_ACCESS_KEY,
};
use crate::errors::{Result, SnowflowError};
use crate::storage::{file_name, s3_operator, upload_file, S3Credentials, S3Location};
use crate::warehouse::{Connector, Statement};

/// Uploads files and drives the ingestion pipe.
pub struct FileIngestion {
    config: FileIngestionConfig,
    connector: Connector,
    env: SharedEnv,
}

impl std::fmt::Debug for FileIngestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIngestion")
            .field("config", &self.config)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

fn checked(kind: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        error!(kind, name, "Refusing unsafe identifier");
        Err(SnowflowError::InvalidIdentifier(name.to_string()))
    }
}

/// Splits `s3://bucket/prefix` or `bucket/prefix` into bucket and prefix.
fn split_bucket(bucket: &str) -> (String, Option<String>) {
    let trimmed = bucket.trim_start_matches("s3://").trim_matches('/');
    match trimmed.split_once('/') {
        Some((name, prefix)) if !prefix.is_empty() => (name.to_string(), Some(prefix.to_string())),
        Some((name, _)) => (name.to_string(), None),
        None => (trimmed.to_string(), None),
    }
}

impl FileIngestion {
    /// Creates a file ingestion client.
    #[must_use]
    pub fn new(config: FileIngestionConfig, connector: Connector, env: SharedEnv) -> Self {
        Self {
            config,
            connector,
            env,
        }
    }

    /// The configured stage.
    #[must_use]
    pub fn default_stage(&self) -> &str {
        &self.config.stage
    }

    /// The configured pipe.
    #[must_use]
    pub fn default_pipe(&self) -> &str {
        &self.config.pipe
    }

    /// Uploads a local file into a named stage with `PUT`.
    pub async fn upload_to_stage(&mut self, local_path: &Path, stage: &str) -> bool {
        let result = async {
            checked("stage", stage)?;
            self.connector.put_file(local_path, stage).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(path = %local_path.display(), stage, "Uploaded file to stage");
                true
            }
            Err(err) => {
                error!(path = %local_path.display(), stage, error = %err, "Stage upload failed");
                false
            }
        }
    }

    /// Asks the pipe to load any staged files it has not seen.
    pub async fn trigger_pipe_refresh(&mut self, pipe: &str) -> bool {
        let result = async {
            checked("pipe", pipe)?;
            self.connector.execute(format!("ALTER PIPE {pipe} REFRESH")).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(pipe, "Triggered pipe refresh");
                true
            }
            Err(err) => {
                error!(pipe, error = %err, "Pipe refresh failed");
                false
            }
        }
    }

    /// Returns the pipe's status descriptor.
    ///
    /// The descriptor is parsed as JSON when possible and returned as a string
    /// otherwise. `None` when the query fails or returns no row.
    pub async fn check_pipe_status(&mut self, pipe: &str) -> Option<Value> {
        let statement = Statement::new("SELECT SYSTEM$PIPE_STATUS(?) AS PIPE_STATUS").bind(pipe);
        let rows = match self.connector.query(statement).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(pipe, error = %err, "Pipe status query failed");
                return None;
            }
        };

        let value = rows.into_iter().next()?.into_iter().next()?.1;
        Some(match value {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        })
    }

    /// Resolves the object-store location and credentials from the
    /// environment and config.
    #[must_use]
    pub fn object_store_target(&self, bucket: &str) -> (S3Location, S3Credentials) {
        let env = self.env.as_ref();
        let (bucket, root) = split_bucket(bucket);
        let location = S3Location {
            bucket,
            root,
            region: resolve(env, AWS_REGION, self.config.s3.region.as_deref()),
            endpoint: self.config.s3.endpoint.clone(),
        };
        let creds = S3Credentials {
            access_key_id: resolve(env, AWS_ACCESS_KEY_ID, None),
            secret_access_key: resolve(env, AWS_SECRET_ACCESS_KEY, None),
            session_token: None,
        };
        (location, creds)
    }

    /// Uploads a local file straight to S3, bypassing the warehouse.
    ///
    /// The object key defaults to the file name.
    pub async fn upload_to_object_store(
        &self,
        local_path: &Path,
        bucket: &str,
        key: Option<&str>,
    ) -> bool {
        let Some(key) = key.map(str::to_string).or_else(|| file_name(local_path)) else {
            error!(path = %local_path.display(), "No object key for path");
            return false;
        };
        let (location, creds) = self.object_store_target(bucket);

        let result = async {
            let op = s3_operator(&location, &creds)?;
            upload_file::<SnowflowError>(&op, local_path, &key).await
        }
        .await;

        match result {
            Ok(size) => {
                info!(bucket = %location.bucket, key = %key, size, "Uploaded file to object store");
                true
            }
            Err(err) => {
                error!(bucket = %location.bucket, key = %key, error = %err, "Object store upload failed");
                false
            }
        }
    }

    /// Closes the connector.
    pub async fn close(&mut self) -> Result<()> {
        self.connector.close().await
    }
}
