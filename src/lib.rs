use aws_lambda_events::event::firehose::{KinesisFirehoseEvent, KinesisFirehoseResponse};
use lambda_runtime::{Error, LambdaEvent};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

pub mod clients;
pub mod config;
pub mod credentials;
pub mod metrics;

pub use crate::clients::AwsClients;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

// lambda handler
pub async fn function_handler(
    clients: &AwsClients,
    config: &Config,
    evt: LambdaEvent<KinesisFirehoseEvent>,
) -> Result<KinesisFirehoseResponse, Error> {
    info!(
        "Handling lambda invocation with {} records",
        evt.payload.records.len()
    );
    metrics::handler(clients, config, evt).await
}
