use crate::config::Config;
use crate::credentials::{CredentialsError, DynCredentialsProvider};
use crate::metrics::sigv4::{self, SignableRequest, SigningError, SigningScope};
use async_trait::async_trait;
use chrono::Utc;
use http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HOST, USER_AGENT};
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
pub const CONTENT_ENCODING_SNAPPY: &str = "snappy";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";
const X_API_KEY: &str = "x-api-key";
const X_REMOTE_WRITE_VERSION: &str = "x-prometheus-remote-write-version";

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("remote write returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("remote write request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to compress payload: {0}")]
    Compression(#[from] snap::Error),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("invalid remote write endpoint {endpoint}: {reason}")]
    Endpoint { endpoint: String, reason: String },
}

/// Sends one encoded (uncompressed) write request to the metrics backend.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn deliver(&self, payload: &[u8]) -> Result<(), DeliveryError>;
}

pub type DynRemoteWriter = Arc<dyn RemoteWriter>;

/// How requests are authenticated.
#[derive(Clone)]
pub enum Signing {
    Unsigned,
    SigV4 {
        region: String,
        service: String,
        credentials: DynCredentialsProvider,
    },
}

/// Snappy-compressing, SigV4-signing remote-write client.
#[derive(Clone)]
pub struct RemoteWriteClient {
    http: reqwest::Client,
    url: Url,
    host: String,
    api_key: String,
    signing: Signing,
}

pub fn set_up_http_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .build()
}

pub fn compress(payload: &[u8]) -> Result<Vec<u8>, snap::Error> {
    snap::raw::Encoder::new().compress_vec(payload)
}

impl RemoteWriteClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        api_key: String,
        signing: Signing,
    ) -> Result<Self, DeliveryError> {
        let invalid = |reason: String| DeliveryError::Endpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(invalid("missing host".to_string())),
        };
        Ok(RemoteWriteClient {
            http,
            url,
            host,
            api_key,
            signing,
        })
    }

    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        credentials: DynCredentialsProvider,
    ) -> Result<Self, DeliveryError> {
        let signing = if config.signed_requests {
            Signing::SigV4 {
                region: config.region.clone(),
                service: config.signing_service.clone(),
                credentials,
            }
        } else {
            Signing::Unsigned
        };
        Self::new(http, &config.endpoint, config.api_key.clone(), signing)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Headers for a request carrying `body`, including the SigV4 set when signing.
    async fn headers(&self, body: &[u8]) -> Result<Vec<(String, String)>, DeliveryError> {
        let mut headers = vec![
            (HOST.to_string(), self.host.clone()),
            (CONTENT_TYPE.to_string(), CONTENT_TYPE_PROTOBUF.to_string()),
            (CONTENT_ENCODING.to_string(), CONTENT_ENCODING_SNAPPY.to_string()),
            (X_REMOTE_WRITE_VERSION.to_string(), REMOTE_WRITE_VERSION.to_string()),
            (
                USER_AGENT.to_string(),
                concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            ),
        ];

        let Signing::SigV4 {
            region,
            service,
            credentials,
        } = &self.signing
        else {
            if !self.api_key.is_empty() {
                headers.push((X_API_KEY.to_string(), self.api_key.clone()));
            }
            return Ok(headers);
        };

        let credentials = credentials.credentials().await?;
        let payload_hash = sigv4::sha256_hex(body);
        let scope = SigningScope {
            region,
            service,
            time: Utc::now(),
        };
        let amz_date = scope.amz_date();

        let signed = [
            (CONTENT_TYPE.as_str(), CONTENT_TYPE_PROTOBUF),
            (HOST.as_str(), self.host.as_str()),
            (X_AMZ_CONTENT_SHA256, payload_hash.as_str()),
            (X_AMZ_DATE, amz_date.as_str()),
            (X_API_KEY, self.api_key.as_str()),
        ];
        let request = SignableRequest {
            method: "POST",
            canonical_uri: self.url.path(),
            query_string: self.url.query().unwrap_or(""),
            headers: &signed,
            payload_hash: &payload_hash,
        };
        let signature = sigv4::sign(&request, &scope, &credentials.secret_access_key)?;

        headers.push((X_AMZ_DATE.to_string(), amz_date.clone()));
        headers.push((X_AMZ_CONTENT_SHA256.to_string(), payload_hash.clone()));
        headers.push((X_AMZ_SECURITY_TOKEN.to_string(), credentials.session_token.clone()));
        headers.push((X_API_KEY.to_string(), self.api_key.clone()));
        headers.push((
            AUTHORIZATION.to_string(),
            signature.authorization_header(&credentials.access_key_id),
        ));
        Ok(headers)
    }
}

#[async_trait]
impl RemoteWriter for RemoteWriteClient {
    async fn deliver(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        let start = Instant::now();
        let body = compress(payload)?;
        // the signature covers the compressed bytes, i.e. what actually goes on the wire
        let headers = self.headers(&body).await?;

        debug!(
            uri = %self.url,
            uncompressed_bytes = payload.len(),
            bytes = body.len(),
            "sending remote write request"
        );

        let mut request = self.http.post(self.url.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let bytes = body.len();
        let response = request.body(body).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(
                %status,
                body = %body,
                elapsed_ms = start.elapsed().as_millis(),
                "remote write rejected"
            );
            return Err(DeliveryError::Status { status, body });
        }

        info!(
            %status,
            bytes,
            elapsed_ms = start.elapsed().as_millis(),
            uri = %self.url,
            "remote write HTTP request completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_host_includes_explicit_port() {
        let client = RemoteWriteClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9090/api/v1/write",
            String::new(),
            Signing::Unsigned,
        )
        .unwrap();
        assert_eq!(client.host(), "127.0.0.1:9090");

        let client = RemoteWriteClient::new(
            reqwest::Client::new(),
            "https://aps-workspaces.us-east-1.amazonaws.com/workspaces/ws-1/api/v1/remote_write",
            String::new(),
            Signing::Unsigned,
        )
        .unwrap();
        assert_eq!(client.host(), "aps-workspaces.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = RemoteWriteClient::new(
            reqwest::Client::new(),
            "not a url",
            String::new(),
            Signing::Unsigned,
        )
        .err()
        .unwrap();
        assert!(matches!(err, DeliveryError::Endpoint { .. }));
    }

    #[test]
    fn test_compress_snappy_roundtrip() {
        let data = b"remote write payload remote write payload remote write payload";
        let compressed = compress(data).unwrap();
        let decompressed = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .unwrap();
        assert_eq!(decompressed, data);
    }
}
