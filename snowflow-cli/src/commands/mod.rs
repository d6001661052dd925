pub mod ingest;
pub mod run;
pub mod setup;
pub mod smoke;

use snowflow::config::{PipelineConfig, SharedEnv};
use snowflow::warehouse::Connector;

/// A connector for the configured account.
fn connector(config: &PipelineConfig, env: SharedEnv) -> Connector {
    Connector::snowflake(config.snowflake.clone(), env)
}
