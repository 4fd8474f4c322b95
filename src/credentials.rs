use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use std::fmt;
use std::sync::Arc;

/// The key triple used to sign one flush.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

// secrets stay out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
    #[error("no credentials provider is configured")]
    NoProvider,
    #[error("failed to resolve credentials: {0}")]
    Resolve(String),
    #[error("credentials are missing the {0}")]
    MissingField(&'static str),
}

impl Credentials {
    /// Builds a credential triple, rejecting any empty field.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Result<Self, CredentialsError> {
        let access_key_id = access_key_id.into();
        let secret_access_key = secret_access_key.into();
        let session_token = session_token.unwrap_or_default();
        if access_key_id.is_empty() {
            return Err(CredentialsError::MissingField("access key id"));
        }
        if secret_access_key.is_empty() {
            return Err(CredentialsError::MissingField("secret access key"));
        }
        if session_token.is_empty() {
            return Err(CredentialsError::MissingField("session token"));
        }
        Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Source of signing credentials, asked again for every flush since session
/// tokens expire.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, CredentialsError>;
}

pub type DynCredentialsProvider = Arc<dyn CredentialsProvider>;

/// Adapter over the AWS SDK default provider chain.
#[derive(Clone, Debug)]
pub struct AwsCredentialsProvider {
    inner: Option<SharedCredentialsProvider>,
}

impl AwsCredentialsProvider {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        AwsCredentialsProvider {
            inner: sdk_config.credentials_provider(),
        }
    }
}

#[async_trait]
impl CredentialsProvider for AwsCredentialsProvider {
    async fn credentials(&self) -> Result<Credentials, CredentialsError> {
        let provider = self.inner.as_ref().ok_or(CredentialsError::NoProvider)?;
        let resolved = provider
            .provide_credentials()
            .await
            .map_err(|e| CredentialsError::Resolve(e.to_string()))?;
        Credentials::new(
            resolved.access_key_id(),
            resolved.secret_access_key(),
            resolved.session_token().map(String::from),
        )
    }
}

/// Fixed credentials, for local receivers and tests.
#[derive(Clone, Debug)]
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(credentials: Credentials) -> Self {
        StaticCredentialsProvider { credentials }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credentials(&self) -> Result<Credentials, CredentialsError> {
        Ok(self.credentials.clone())
    }
}
