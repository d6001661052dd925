//! Smoke checks against a provisioned account.
//!
//! Each check reports PASS, FAIL or WARN. Missing objects fail; optional
//! capabilities (listing a stage, querying pipe status, calling a
//! validation procedure before data exists) only warn.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{is_identifier, PipelineConfig};
use crate::errors::{Result, SnowflowError};
use crate::utils::{compact_timestamp, now_utc};
use crate::warehouse::{Connector, Row, Statement};

const DEFAULT_DATABASE: &str = "DATA_PIPELINE_DB";
const DEFAULT_WAREHOUSE: &str = "DATA_PIPELINE_WH";

const SCHEMAS: [&str; 4] = ["RAW", "CLEANED", "ANALYTICS", "VALIDATION"];
const FILE_FORMATS: [&str; 3] = ["CSV_FORMAT", "PARQUET_FORMAT", "JSON_FORMAT"];
const TRANSFORM_PROCEDURES: [&str; 3] =
    ["CLEAN_RAW_DATA", "REMOVE_DUPLICATES", "APPLY_BUSINESS_TRANSFORMS"];
const VALIDATION_PROCEDURES: [&str; 4] = [
    "VALIDATE_ROW_COUNT",
    "VALIDATE_NULL_PERCENTAGE",
    "VALIDATE_DATA_FRESHNESS",
    "RUN_ALL_VALIDATIONS",
];
const VALIDATION_TABLES: [&str; 3] = ["PIPELINE_LOGS", "VALIDATION_RESULTS", "DATA_QUALITY_METRICS"];
const TASKS: [&str; 2] = ["PIPELINE_ORCHESTRATOR", "DATA_QUALITY_MONITOR"];

/// Result of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// The check passed.
    Pass,
    /// A required object is missing or a query failed.
    Fail,
    /// Something optional is not in place.
    Warn,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
        })
    }
}

/// One recorded check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub name: String,
    /// Outcome.
    pub status: CheckStatus,
    /// Detail, if any.
    pub message: Option<String>,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.name)?;
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// All checks of a smoke run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeReport {
    /// Checks in execution order.
    pub results: Vec<CheckResult>,
}

impl SmokeReport {
    fn record(&mut self, name: impl Into<String>, status: CheckStatus, message: Option<String>) {
        let result = CheckResult {
            name: name.into(),
            status,
            message,
        };
        match status {
            CheckStatus::Pass => info!(check = %result.name, "PASS"),
            CheckStatus::Warn => warn!(check = %result.name, message = ?result.message, "WARN"),
            CheckStatus::Fail => error!(check = %result.name, message = ?result.message, "FAIL"),
        }
        self.results.push(result);
    }

    fn pass(&mut self, name: impl Into<String>) {
        self.record(name, CheckStatus::Pass, None);
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Checks with the given status.
    #[must_use]
    pub fn with_status(&self, status: CheckStatus) -> Vec<&CheckResult> {
        self.results.iter().filter(|r| r.status == status).collect()
    }

    /// True when no check failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.count(CheckStatus::Fail) == 0
    }

    /// A printable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Total checks: {}", self.results.len()),
            format!("Passed: {}", self.count(CheckStatus::Pass)),
            format!("Failed: {}", self.count(CheckStatus::Fail)),
            format!("Warnings: {}", self.count(CheckStatus::Warn)),
        ];
        for status in [CheckStatus::Fail, CheckStatus::Warn] {
            for result in self.with_status(status) {
                lines.push(format!("  {result}"));
            }
        }
        lines.join("\n")
    }
}

/// Collects the `name` column of `SHOW` output.
fn names(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn text(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Checks that the warehouse objects the pipeline relies on exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeSuite {
    database: String,
    warehouse: String,
    stage: String,
    pipe: String,
    log_table: String,
    target_table: String,
}

impl SmokeSuite {
    /// Builds the suite from the pipeline settings.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let suite = Self {
            database: config
                .snowflake
                .database
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            warehouse: config
                .snowflake
                .warehouse
                .clone()
                .unwrap_or_else(|| DEFAULT_WAREHOUSE.to_string()),
            stage: config.file_ingestion.stage.clone(),
            pipe: config.file_ingestion.pipe.clone(),
            log_table: config.validation.log_table.clone(),
            target_table: config.validation.target_table.clone(),
        };
        for name in [
            &suite.database,
            &suite.warehouse,
            &suite.stage,
            &suite.pipe,
            &suite.log_table,
        ] {
            if !is_identifier(name) {
                return Err(SnowflowError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(suite)
    }

    /// Runs every check. Query errors are recorded as failures.
    pub async fn run(&self, connector: &mut Connector) -> SmokeReport {
        let mut report = SmokeReport::default();

        if let Err(err) = self.check_connection(connector, &mut report).await {
            report.record("Connection", CheckStatus::Fail, Some(err.to_string()));
            return report;
        }

        macro_rules! guarded {
            ($name:expr, $check:expr) => {
                if let Err(err) = $check.await {
                    report.record($name, CheckStatus::Fail, Some(err.to_string()));
                }
            };
        }

        guarded!("Warehouse", self.check_warehouse(connector, &mut report));
        guarded!("Database and schemas", self.check_schemas(connector, &mut report));
        guarded!(
            "File formats",
            self.check_required(
                connector,
                &mut report,
                &format!("SHOW FILE FORMATS IN SCHEMA {}.RAW", self.database),
                "File format ",
                &FILE_FORMATS,
            )
        );
        guarded!("Stages", self.check_stage(connector, &mut report));
        guarded!("Pipe", self.check_pipe(connector, &mut report));
        guarded!(
            "Transformation procedures",
            self.check_required(
                connector,
                &mut report,
                &format!("SHOW PROCEDURES IN SCHEMA {}.CLEANED", self.database),
                "Procedure CLEANED.",
                &TRANSFORM_PROCEDURES,
            )
        );
        guarded!(
            "Validation procedures",
            self.check_required(
                connector,
                &mut report,
                &format!("SHOW PROCEDURES IN SCHEMA {}.VALIDATION", self.database),
                "Procedure VALIDATION.",
                &VALIDATION_PROCEDURES,
            )
        );
        guarded!(
            "Validation tables",
            self.check_required(
                connector,
                &mut report,
                &format!("SHOW TABLES IN SCHEMA {}.VALIDATION", self.database),
                "Table VALIDATION.",
                &VALIDATION_TABLES,
            )
        );
        guarded!(
            "Tasks",
            self.check_required(
                connector,
                &mut report,
                &format!("SHOW TASKS IN DATABASE {}", self.database),
                "Task ",
                &TASKS,
            )
        );
        guarded!("Pipeline logging", self.check_logging(connector, &mut report));

        info!(
            passed = report.count(CheckStatus::Pass),
            failed = report.count(CheckStatus::Fail),
            warnings = report.count(CheckStatus::Warn),
            "Smoke checks finished"
        );
        report
    }

    async fn check_connection(&self, connector: &mut Connector, report: &mut SmokeReport) -> Result<()> {
        let rows = connector
            .query("SELECT CURRENT_VERSION() AS VERSION, CURRENT_DATABASE() AS DB, CURRENT_WAREHOUSE() AS WH")
            .await?;
        match rows.first() {
            Some(row) => report.record(
                "Connection",
                CheckStatus::Pass,
                Some(format!(
                    "version {}, database {}, warehouse {}",
                    text(row, "VERSION"),
                    text(row, "DB"),
                    text(row, "WH")
                )),
            ),
            None => report.record("Connection", CheckStatus::Fail, Some("no result returned".into())),
        }
        Ok(())
    }

    async fn check_warehouse(&self, connector: &mut Connector, report: &mut SmokeReport) -> Result<()> {
        let rows = connector
            .query(format!("SHOW WAREHOUSES LIKE '{}'", self.warehouse))
            .await?;
        let Some(row) = rows.first() else {
            report.record(
                format!("Warehouse {}", self.warehouse),
                CheckStatus::Fail,
                Some("warehouse not found".into()),
            );
            return Ok(());
        };

        report.record(
            format!("Warehouse {}", self.warehouse),
            CheckStatus::Pass,
            Some(format!("state {}", text(row, "state"))),
        );

        let auto_suspend: i64 = text(row, "auto_suspend").parse().unwrap_or(0);
        if auto_suspend > 0 {
            report.record(
                "Auto-suspend configured",
                CheckStatus::Pass,
                Some(format!("{auto_suspend}s")),
            );
        } else {
            report.record("Auto-suspend configured", CheckStatus::Warn, None);
        }

        if text(row, "auto_resume").eq_ignore_ascii_case("true") {
            report.pass("Auto-resume configured");
        } else {
            report.record("Auto-resume configured", CheckStatus::Warn, None);
        }
        Ok(())
    }

    async fn check_schemas(&self, connector: &mut Connector, report: &mut SmokeReport) -> Result<()> {
        let rows = connector
            .query(format!("SHOW DATABASES LIKE '{}'", self.database))
            .await?;
        if rows.is_empty() {
            report.record(
                format!("Database {}", self.database),
                CheckStatus::Fail,
                Some("database not found".into()),
            );
            return Ok(());
        }
        report.pass(format!("Database {}", self.database));

        self.check_required(
            connector,
            report,
            &format!("SHOW SCHEMAS IN DATABASE {}", self.database),
            "Schema ",
            &SCHEMAS,
        )
        .await
    }

    /// Records one result per required name found in the `SHOW` output.
    async fn check_required(
        &self,
        connector: &mut Connector,
        report: &mut SmokeReport,
        sql: &str,
        label: &str,
        required: &[&str],
    ) -> Result<()> {
        let existing = names(&connector.query(sql).await?);
        for name in required {
            let check = format!("{label}{name}");
            if existing.iter().any(|e| e == name) {
                report.pass(check);
            } else {
                report.record(check, CheckStatus::Fail, Some("not found".into()));
            }
        }
        Ok(())
    }

    async fn check_stage(&self, connector: &mut Connector, report: &mut SmokeReport) -> Result<()> {
        let stage_name = self.stage.rsplit('.').next().unwrap_or(&self.stage);
        let existing = names(
            &connector
                .query(format!("SHOW STAGES IN SCHEMA {}.RAW", self.database))
                .await?,
        );
        if !existing.iter().any(|e| e == stage_name) {
            report.record(
                format!("Stage {}", self.stage),
                CheckStatus::Fail,
                Some("stage not found".into()),
            );
            return Ok(());
        }
        report.pass(format!("Stage {}", self.stage));

        match connector.query(format!("LIST @{}", self.stage)).await {
            Ok(_) => report.pass("Stage access"),
            Err(err) => report.record("Stage access", CheckStatus::Warn, Some(err.to_string())),
        }
        Ok(())
    }

    async fn check_pipe(&self, connector: &mut Connector, report: &mut SmokeReport) -> Result<()> {
        let pipe_name = self.pipe.rsplit('.').next().unwrap_or(&self.pipe);
        let rows = connector
            .query(format!("SHOW PIPES LIKE '{pipe_name}'"))
            .await?;
        let Some(row) = rows.first() else {
            report.record(
                format!("Pipe {}", self.pipe),
                CheckStatus::Fail,
                Some("pipe not found".into()),
            );
            return Ok(());
        };
        report.record(
            format!("Pipe {}", self.pipe),
            CheckStatus::Pass,
            Some(format!("state {}", text(row, "state"))),
        );

        let status = Statement::new("SELECT SYSTEM$PIPE_STATUS(?) AS STATUS").bind(&self.pipe);
        match connector.query(status).await {
            Ok(_) => report.pass("Pipe status"),
            Err(err) => report.record("Pipe status", CheckStatus::Warn, Some(err.to_string())),
        }
        Ok(())
    }

    async fn check_logging(&self, connector: &mut Connector, report: &mut SmokeReport) -> Result<()> {
        let run_id = format!("TEST_{}", compact_timestamp(&now_utc()));

        connector
            .execute(
                Statement::new(format!(
                    "INSERT INTO {} (PIPELINE_NAME, RUN_ID, START_TIME, STATUS) \
                     VALUES (?, ?, CURRENT_TIMESTAMP(), ?)",
                    self.log_table
                ))
                .bind("TEST_PIPELINE")
                .bind(run_id.as_str())
                .bind("IN_PROGRESS"),
            )
            .await?;
        connector.commit().await?;

        let rows = connector
            .query(
                Statement::new(format!("SELECT * FROM {} WHERE RUN_ID = ?", self.log_table))
                    .bind(run_id.as_str()),
            )
            .await?;
        if rows.is_empty() {
            report.record("Pipeline logging", CheckStatus::Fail, Some("log row not found".into()));
            return Ok(());
        }
        report.record("Pipeline logging", CheckStatus::Pass, Some(format!("run {run_id}")));

        let analytics = connector
            .query(format!("SHOW TABLES IN SCHEMA {}.ANALYTICS", self.database))
            .await;
        match analytics {
            Ok(tables) if !tables.is_empty() => {
                let call = Statement::new("CALL VALIDATION.VALIDATE_ROW_COUNT(?, 0, NULL, ?)")
                    .bind(&self.target_table)
                    .bind(run_id.as_str());
                match connector.execute(call).await {
                    Ok(()) => report.pass("Validation procedure"),
                    Err(err) => report.record(
                        "Validation procedure",
                        CheckStatus::Warn,
                        Some(err.to_string()),
                    ),
                }
            }
            Ok(_) => report.record(
                "Validation procedure",
                CheckStatus::Warn,
                Some("no tables to validate yet".into()),
            ),
            Err(err) => report.record("Validation procedure", CheckStatus::Warn, Some(err.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn named(names: &[&str]) -> Vec<Row> {
        names
            .iter()
            .map(|n| RecordingDriver::row([("name", json!(n))]))
            .collect()
    }

    fn healthy() -> RecordingDriver {
        RecordingDriver::new()
            .with_log_table("VALIDATION.PIPELINE_LOGS")
            .respond(
                "CURRENT_VERSION()",
                vec![RecordingDriver::row([
                    ("VERSION", json!("8.1.0")),
                    ("DB", json!("DATA_PIPELINE_DB")),
                    ("WH", json!("DATA_PIPELINE_WH")),
                ])],
            )
            .respond(
                "SHOW WAREHOUSES",
                vec![RecordingDriver::row([
                    ("name", json!("DATA_PIPELINE_WH")),
                    ("state", json!("SUSPENDED")),
                    ("auto_suspend", json!(60)),
                    ("auto_resume", json!("true")),
                ])],
            )
            .respond("SHOW DATABASES", named(&["DATA_PIPELINE_DB"]))
            .respond("SHOW SCHEMAS", named(&SCHEMAS))
            .respond("SHOW FILE FORMATS", named(&FILE_FORMATS))
            .respond("SHOW STAGES", named(&["FILE_STAGE"]))
            .respond(
                "SHOW PIPES",
                vec![RecordingDriver::row([
                    ("name", json!("FILE_INGESTION_PIPE")),
                    ("state", json!("RUNNING")),
                ])],
            )
            .respond("IN SCHEMA DATA_PIPELINE_DB.CLEANED", named(&TRANSFORM_PROCEDURES))
            .respond("PROCEDURES IN SCHEMA DATA_PIPELINE_DB.VALIDATION", named(&VALIDATION_PROCEDURES))
            .respond("TABLES IN SCHEMA DATA_PIPELINE_DB.VALIDATION", named(&VALIDATION_TABLES))
            .respond("SHOW TASKS", named(&TASKS))
            .respond("TABLES IN SCHEMA DATA_PIPELINE_DB.ANALYTICS", named(&["FINAL_DATA"]))
    }

    fn suite() -> SmokeSuite {
        SmokeSuite::from_config(&PipelineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_healthy_account_passes() {
        let driver = healthy();
        let mut connector = driver.connector();

        let report = suite().run(&mut connector).await;

        assert!(report.succeeded(), "{}", report.summary());
        assert!(report.with_status(CheckStatus::Warn).is_empty());
        assert_eq!(driver.log_rows()[0]["PIPELINE_NAME"], json!("TEST_PIPELINE"));
    }

    #[tokio::test]
    async fn test_missing_objects_fail_and_optional_warn() {
        let driver = RecordingDriver::new()
            .respond(
                "CURRENT_VERSION()",
                vec![RecordingDriver::row([("VERSION", json!("8.1.0"))])],
            )
            .respond("SHOW SCHEMAS", named(&["RAW", "CLEANED"]))
            .respond("SHOW DATABASES", named(&["DATA_PIPELINE_DB"]))
            .respond("SHOW STAGES", named(&["FILE_STAGE"]))
            .fail("LIST @", "insufficient privileges");
        let mut connector = driver.connector();

        let report = suite().run(&mut connector).await;

        assert!(!report.succeeded());
        let failed: Vec<_> = report
            .with_status(CheckStatus::Fail)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert!(failed.contains(&"Schema ANALYTICS".to_string()));
        assert!(failed.contains(&"Warehouse DATA_PIPELINE_WH".to_string()));
        assert!(report
            .with_status(CheckStatus::Warn)
            .iter()
            .any(|r| r.name == "Stage access"));
        assert!(report.summary().contains("Failed:"));
    }

    #[tokio::test]
    async fn test_connection_failure_stops_checks() {
        let driver = RecordingDriver::new().fail_connect("Incorrect username or password");
        let mut connector = driver.connector();

        let report = suite().run(&mut connector).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, CheckStatus::Fail);
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let mut config = PipelineConfig::default();
        config.snowflake.database = Some("DB'; DROP".to_string());
        assert!(SmokeSuite::from_config(&config).is_err());
    }
}
