//! Provisioning: runs the setup SQL files in order.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SetupConfig;
use crate::errors::Result;
use crate::warehouse::Connector;

/// Files executed and skipped by a setup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupReport {
    /// Files that ran, with their statement counts.
    pub executed: Vec<(String, usize)>,
    /// Files that were not found.
    pub skipped: Vec<String>,
}

/// Executes the configured setup files.
#[derive(Debug, Clone)]
pub struct SetupRunner {
    config: SetupConfig,
}

impl SetupRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(config: SetupConfig) -> Self {
        Self { config }
    }

    /// Full path of each configured file, in execution order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.config
            .files
            .iter()
            .map(|file| self.config.sql_dir.join(file))
            .collect()
    }

    /// Runs every file that exists, each in its own transaction.
    ///
    /// Missing files are skipped with a warning. The first failing file
    /// aborts the run.
    pub async fn run(&self, connector: &mut Connector) -> Result<SetupReport> {
        let mut report = SetupReport::default();
        info!(sql_dir = %self.config.sql_dir.display(), files = self.config.files.len(), "Starting setup");

        for (file, path) in self.config.files.iter().zip(self.paths()) {
            if !path.is_file() {
                warn!(file = %file, "Setup file not found, skipping");
                report.skipped.push(file.clone());
                continue;
            }
            let statements = connector.execute_file(&path).await?;
            info!(file = %file, statements, "Completed setup file");
            report.executed.push((file.clone(), statements));
        }

        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "Setup completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;
    use pretty_assertions::assert_eq;

    fn runner(dir: &std::path::Path, files: &[&str]) -> SetupRunner {
        SetupRunner::new(SetupConfig {
            sql_dir: dir.to_path_buf(),
            files: files.iter().map(|f| (*f).to_string()).collect(),
        })
    }

    #[test]
    fn test_default_order() {
        let files = SetupConfig::default().files;
        assert_eq!(files.first().map(String::as_str), Some("01_setup_warehouse.sql"));
        let tasks = files.iter().position(|f| f == "09_setup_tasks.sql").unwrap();
        let procs = files
            .iter()
            .position(|f| f == "10_orchestration_procedures.sql")
            .unwrap();
        assert!(procs < tasks);
    }

    #[tokio::test]
    async fn test_runs_existing_files_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("01_a.sql"),
            "CREATE WAREHOUSE IF NOT EXISTS WH;\nUSE WAREHOUSE WH;",
        )
        .unwrap();
        std::fs::write(dir.path().join("03_c.sql"), "-- only a comment\nSELECT 1;").unwrap();

        let driver = RecordingDriver::new();
        let mut connector = driver.connector();
        let report = runner(dir.path(), &["01_a.sql", "02_b.sql", "03_c.sql"])
            .run(&mut connector)
            .await
            .unwrap();

        assert_eq!(
            report.executed,
            vec![("01_a.sql".to_string(), 2), ("03_c.sql".to_string(), 1)]
        );
        assert_eq!(report.skipped, vec!["02_b.sql".to_string()]);
        assert_eq!(driver.commits(), 2);
    }

    #[tokio::test]
    async fn test_failure_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01.sql"), "CREATE STAGE BROKEN;").unwrap();
        std::fs::write(dir.path().join("02.sql"), "SELECT 2;").unwrap();

        let driver = RecordingDriver::new().fail("BROKEN", "syntax error");
        let mut connector = driver.connector();
        let result = runner(dir.path(), &["01.sql", "02.sql"])
            .run(&mut connector)
            .await;

        assert!(result.is_err());
        assert_eq!(driver.rollbacks(), 1);
        assert!(!driver.executed_sql().contains(&"SELECT 2".to_string()));
    }
}
