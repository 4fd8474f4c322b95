use aws_config::SdkConfig;
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::metrics::process::RecordStatus;

pub const MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_SIGNING_SERVICE: &str = "aps";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("error parsing {name} - {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("unsupported INPUT_FORMAT {0}, only json metric streams can be processed")]
    UnsupportedInputFormat(String),
}

/// Output format selected on the metric stream.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum InputFormat {
    Json,
}

impl FromStr for InputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "json" => Ok(InputFormat::Json),
            other => Err(ConfigError::UnsupportedInputFormat(other.to_string())),
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub region: String,
    pub endpoint: String,
    pub signed_requests: bool,
    pub signing_service: String,
    pub input_format: InputFormat,
    pub batch_size: usize,
    pub api_key: String,
    pub delivered_record_result: RecordStatus,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub deadline_margin: Duration,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parsed_nonzero(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match parsed(name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            reason: "must be greater than 0".to_string(),
        }),
        value => Ok(value),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                reason: format!("{other} is not a boolean"),
            }),
        },
        None => Ok(default),
    }
}

impl Config {
    pub fn load_from_env() -> Result<Config, ConfigError> {
        let region = required("REGION")
            .or_else(|_| required("AWS_REGION"))
            .map_err(|_| ConfigError::Missing("REGION"))?;

        let endpoint = match optional("REMOTE_WRITE_ENDPOINT") {
            Some(endpoint) => endpoint,
            None => {
                let workspace_id = required("WORKSPACE_ID")?;
                format!(
                    "https://aps-workspaces.{}.amazonaws.com/workspaces/{}/api/v1/remote_write",
                    region, workspace_id
                )
            }
        };

        let batch_size = parsed("BATCH_SIZE", MAX_BATCH_SIZE)?;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid {
                name: "BATCH_SIZE",
                reason: format!("{batch_size} is outside 1..={MAX_BATCH_SIZE}"),
            });
        }

        let delivered_record_result = match optional("DELIVERED_RECORD_RESULT") {
            Some(raw) => match raw.trim() {
                "Ok" => RecordStatus::Ok,
                "Dropped" => RecordStatus::Dropped,
                other => {
                    return Err(ConfigError::Invalid {
                        name: "DELIVERED_RECORD_RESULT",
                        reason: format!("{other} is neither Ok nor Dropped"),
                    })
                }
            },
            None => RecordStatus::Ok,
        };

        Ok(Config {
            region,
            endpoint,
            signed_requests: parse_bool("SIGNED_REQUESTS", true)?,
            signing_service: optional("SIGNING_SERVICE")
                .unwrap_or_else(|| DEFAULT_SIGNING_SERVICE.to_string()),
            input_format: optional("INPUT_FORMAT")
                .map(|s| s.parse::<InputFormat>())
                .transpose()?
                .unwrap_or(InputFormat::Json),
            batch_size,
            api_key: env::var("API_KEY").unwrap_or_default(),
            delivered_record_result,
            request_timeout: Duration::from_secs(parsed_nonzero("HTTP_TIMEOUT_SECS", 30)?),
            connect_timeout: Duration::from_secs(parsed_nonzero("HTTP_CONNECT_TIMEOUT_SECS", 10)?),
            deadline_margin: Duration::from_millis(parsed("DEADLINE_MARGIN_MS", 2000)?),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum KeySourceError {
    #[error("Failed to access AWS Secrets Manager. Please make sure the lambda function has permissions to access the {secret_id} secret. Error: {error:?}")]
    FailedToAccessSecretsManager {
        secret_id: String,
        error: GetSecretValueError,
    },
    #[error("Didn't find the {secret_id} secret in AWS secretsmanager")]
    MissingSecret { secret_id: String },
}

pub fn is_secret_arn(value: &str) -> bool {
    value.starts_with("arn:aws:secretsmanager:")
}

pub async fn get_api_key_from_secrets_manager(
    aws_config: &SdkConfig,
    secret_id: String,
) -> Result<String, KeySourceError> {
    let secretsmanager = aws_sdk_secretsmanager::Client::new(aws_config);
    let response = secretsmanager
        .get_secret_value()
        .set_secret_id(Some(secret_id.clone()))
        .send()
        .await
        .map_err(|error| KeySourceError::FailedToAccessSecretsManager {
            secret_id: secret_id.clone(),
            error: error.into_service_error(),
        })?;
    response
        .secret_string
        .ok_or(KeySourceError::MissingSecret { secret_id })
}
