use crate::clients::AwsClients;
use crate::config::Config;
use aws_lambda_events::event::firehose::{KinesisFirehoseEvent, KinesisFirehoseResponse};
use lambda_runtime::{Error, LambdaEvent};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub mod aggregate;
pub mod encode;
pub mod process;
pub mod prompb;
pub mod record;
pub mod remote_write;
pub mod sanitize;
pub mod sigv4;

/// Converts the invocation deadline (epoch millis, 0 when unknown) into the instant
/// after which no further records should be read.
pub fn invocation_deadline(deadline_ms: u64, margin: Duration) -> Option<Instant> {
    if deadline_ms == 0 {
        return None;
    }
    let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms);
    let remaining = deadline
        .duration_since(SystemTime::now())
        .unwrap_or_default();
    Some(Instant::now() + remaining.saturating_sub(margin))
}

// metric stream transformation handler
pub async fn handler(
    clients: &AwsClients,
    config: &Config,
    evt: LambdaEvent<KinesisFirehoseEvent>,
) -> Result<KinesisFirehoseResponse, Error> {
    let deadline = invocation_deadline(evt.context.deadline, config.deadline_margin);
    debug!(request_id = %evt.context.request_id, ?deadline, "metrics invocation");

    let options = process::ProcessOptions::from_config(config, deadline);
    let response =
        process::transform_firehose_event(&options, clients.remote_writer.as_ref(), evt.payload)
            .await;
    Ok(response)
}
