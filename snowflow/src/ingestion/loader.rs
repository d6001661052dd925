//! Loading fetched records into a raw table.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::is_identifier;
use crate::errors::{Result, SnowflowError};
use crate::utils::{now_utc, ntz_timestamp};
use crate::warehouse::{BindValue, Connector, Statement};

/// Source tag stored with API records.
pub const API_SOURCE: &str = "API";

/// Rows per `INSERT` statement.
pub const INSERT_BATCH_SIZE: usize = 200;

const COLUMNS_PER_ROW: usize = 4;

/// `CREATE TABLE IF NOT EXISTS` for a raw landing table.
#[must_use]
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (data VARIANT, ingestion_timestamp TIMESTAMP_NTZ, \
         run_id VARCHAR(255), source VARCHAR(50))"
    )
}

/// Builds a multi-row insert for `rows` records.
///
/// `PARSE_JSON` is not allowed inside a `VALUES` clause of an `INSERT`, so the
/// bound values are selected from an inline `VALUES` table instead.
#[must_use]
pub fn insert_sql(table: &str, rows: usize) -> String {
    let tuple = "(?, ?, ?, ?)";
    let values = vec![tuple; rows].join(", ");
    format!(
        "INSERT INTO {table} (data, ingestion_timestamp, run_id, source) \
         SELECT PARSE_JSON(column1), TO_TIMESTAMP_NTZ(column2), column3, column4 \
         FROM VALUES {values}"
    )
}

/// Adds `ingestion_timestamp`, `run_id` and `source` to a record.
///
/// Non-object records are stored under a `value` key.
#[must_use]
pub fn augment_record(record: &Value, ingested_at: &str, run_tag: &str, source: &str) -> Value {
    let mut object = match record {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    };
    object.insert("ingestion_timestamp".to_string(), Value::from(ingested_at));
    object.insert("run_id".to_string(), Value::from(run_tag));
    object.insert("source".to_string(), Value::from(source));
    Value::Object(object)
}

/// Inserts `records` into `table` in one transaction.
///
/// Creates the table if needed. Any failing batch rolls back the whole load.
/// Returns the number of rows inserted.
pub async fn load_records(
    connector: &mut Connector,
    records: &[Value],
    table: &str,
    run_tag: &str,
) -> Result<usize> {
    if !is_identifier(table) {
        return Err(SnowflowError::InvalidIdentifier(table.to_string()));
    }

    connector.execute(create_table_sql(table)).await?;

    let ingested_at = ntz_timestamp(&now_utc());
    connector.execute("BEGIN").await?;
    if let Err(err) = insert_batches(connector, records, table, run_tag, &ingested_at).await {
        if let Err(rollback_err) = connector.rollback().await {
            warn!(error = %rollback_err, "Rollback failed");
        }
        return Err(err);
    }
    connector.commit().await?;

    Ok(records.len())
}

async fn insert_batches(
    connector: &mut Connector,
    records: &[Value],
    table: &str,
    run_tag: &str,
    ingested_at: &str,
) -> Result<()> {
    for (index, chunk) in records.chunks(INSERT_BATCH_SIZE).enumerate() {
        let mut statement = Statement::new(insert_sql(table, chunk.len()));
        statement.binds.reserve(chunk.len() * COLUMNS_PER_ROW);
        for record in chunk {
            let payload = augment_record(record, ingested_at, run_tag, API_SOURCE);
            statement.binds.extend([
                BindValue::Text(payload.to_string()),
                BindValue::from(ingested_at),
                BindValue::from(run_tag),
                BindValue::from(API_SOURCE),
            ]);
        }
        debug!(table, batch = index, rows = chunk.len(), "Inserting batch");
        connector.execute(statement).await?;
    }
    Ok(())
}
