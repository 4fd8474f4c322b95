use aws_config::SdkConfig;
use lambda_runtime::Error;
use std::sync::Arc;

use crate::config::Config;
use crate::credentials::{AwsCredentialsProvider, DynCredentialsProvider};
use crate::metrics::remote_write::{set_up_http_client, DynRemoteWriter, RemoteWriteClient};

/// Long-lived clients shared by every invocation of the lambda function.
#[derive(Clone)]
pub struct AwsClients {
    pub remote_writer: DynRemoteWriter,
}

impl AwsClients {
    pub fn new(sdk_config: &SdkConfig, config: &Config) -> Result<Self, Error> {
        Self::with_credentials(config, Arc::new(AwsCredentialsProvider::new(sdk_config)))
    }

    /// The credentials provider is handed to the remote-write client, which asks it
    /// for fresh credentials on every signed flush.
    pub fn with_credentials(
        config: &Config,
        credentials: DynCredentialsProvider,
    ) -> Result<Self, Error> {
        let http = set_up_http_client(config)?;
        let writer = RemoteWriteClient::from_config(config, http, credentials)?;
        Ok(AwsClients {
            remote_writer: Arc::new(writer),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::credentials::{Credentials, StaticCredentialsProvider};
    use crate::metrics::process::RecordStatus;
    use std::time::Duration;

    fn config(endpoint: &str) -> Config {
        Config {
            region: "us-east-1".to_string(),
            endpoint: endpoint.to_string(),
            signed_requests: true,
            signing_service: "aps".to_string(),
            input_format: crate::config::InputFormat::Json,
            batch_size: 500,
            api_key: String::new(),
            delivered_record_result: RecordStatus::Ok,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            deadline_margin: Duration::from_millis(2000),
        }
    }

    fn credentials() -> DynCredentialsProvider {
        Arc::new(StaticCredentialsProvider::new(
            Credentials::new("AKID", "secret", Some("token".to_string())).unwrap(),
        ))
    }

    #[test]
    fn test_clients_from_config() {
        let clients = AwsClients::with_credentials(
            &config("https://aps-workspaces.us-east-1.amazonaws.com/workspaces/ws-1/api/v1/remote_write"),
            credentials(),
        );
        assert!(clients.is_ok());

        let clients = AwsClients::with_credentials(&config("not a url"), credentials());
        assert!(clients.is_err());
    }
}
