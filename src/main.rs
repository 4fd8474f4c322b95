use aws_config::BehaviorVersion;
use aws_lambda_events::event::firehose::KinesisFirehoseEvent;
use cwstream_remote_write::config;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    cwstream_remote_write::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::v2023_11_09()).await;
    let mut config = config::Config::load_from_env()?;

    // if the API key is an ARN, fetch the key itself from Secrets Manager
    if config::is_secret_arn(&config.api_key) {
        config.api_key =
            config::get_api_key_from_secrets_manager(&aws_config, config.api_key.clone())
                .await
                .map_err(|e| e.to_string())?;
    };

    info!(
        endpoint = %config.endpoint,
        signed = config.signed_requests,
        batch_size = config.batch_size,
        input_format = %config.input_format,
        "configuration loaded"
    );

    let clients = cwstream_remote_write::AwsClients::new(&aws_config, &config)?;

    run(service_fn(|request: LambdaEvent<KinesisFirehoseEvent>| {
        cwstream_remote_write::function_handler(&clients, &config, request)
    }))
    .await
}
