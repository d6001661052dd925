//! Data ingestion from REST APIs and files.

mod api;
mod file;
mod loader;
mod retry;

pub use api::{normalize_response, ApiIngestion, EndpointReport, API_KEY_HEADER};
pub use file::FileIngestion;
pub use loader::{
    augment_record, create_table_sql, insert_sql, load_records, API_SOURCE, INSERT_BATCH_SIZE,
};
pub use retry::RetryPolicy;
