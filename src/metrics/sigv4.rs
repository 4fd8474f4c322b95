use chrono::{DateTime, Utc};
use itertools::Itertools;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use tracing::debug;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SCOPE_TERMINATOR: &str = "aws4_request";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_STAMP_FORMAT: &str = "%Y%m%d";

#[derive(thiserror::Error, Debug)]
pub enum SigningError {
    #[error("HMAC-SHA256 is unavailable: {0}")]
    Crypto(#[from] ErrorStack),
}

/// The request parts covered by a signature.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub canonical_uri: &'a str,
    pub query_string: &'a str,
    /// Header names are matched case-insensitively; every header listed is signed.
    pub headers: &'a [(&'a str, &'a str)],
    /// Hex SHA-256 of the exact bytes sent as the body.
    pub payload_hash: &'a str,
}

/// Where and when a signature is valid.
#[derive(Debug, Clone)]
pub struct SigningScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningScope<'_> {
    /// `YYYYMMDDTHHMMSSZ`, the value of `x-amz-date`.
    pub fn amz_date(&self) -> String {
        format_amz_date(self.time)
    }

    pub fn date_stamp(&self) -> String {
        self.time.format(DATE_STAMP_FORMAT).to_string()
    }

    pub fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.date_stamp(),
            self.region,
            self.service,
            SCOPE_TERMINATOR
        )
    }
}

/// A computed signature plus what the `Authorization` header needs alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signed_headers: String,
    pub credential_scope: String,
    pub signature: String,
}

impl Signature {
    pub fn authorization_header(&self, access_key_id: &str) -> String {
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, access_key_id, self.credential_scope, self.signed_headers, self.signature
        )
    }
}

pub fn format_amz_date(time: DateTime<Utc>) -> String {
    time.format(AMZ_DATE_FORMAT).to_string()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(openssl::sha::sha256(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

/// Lowercased, trimmed headers sorted by name, one `name:value\n` line each, and the
/// matching `;`-joined list of names.
pub fn canonical_headers(headers: &[(&str, &str)]) -> (String, String) {
    let sorted = headers
        .iter()
        .map(|(name, value)| (name.trim().to_lowercase(), value.trim()))
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .collect_vec();

    let canonical = sorted
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed = sorted.iter().map(|(name, _)| name.as_str()).join(";");
    (canonical, signed)
}

pub fn canonical_request(request: &SignableRequest) -> (String, String) {
    let (headers, signed_headers) = canonical_headers(request.headers);
    let canonical = [
        request.method,
        request.canonical_uri,
        request.query_string,
        headers.as_str(),
        signed_headers.as_str(),
        request.payload_hash,
    ]
    .join("\n");
    (canonical, signed_headers)
}

pub fn string_to_sign(scope: &SigningScope, canonical_request: &str) -> String {
    [
        ALGORITHM,
        scope.amz_date().as_str(),
        scope.credential_scope().as_str(),
        sha256_hex(canonical_request.as_bytes()).as_str(),
    ]
    .join("\n")
}

/// Derives the date/region/service bound key from the secret access key.
pub fn signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

pub fn sign(
    request: &SignableRequest,
    scope: &SigningScope,
    secret_key: &str,
) -> Result<Signature, SigningError> {
    let (canonical, signed_headers) = canonical_request(request);
    debug!(canonical_request = %canonical.replace('\n', "\\n"), "sigv4 canonical request");

    let to_sign = string_to_sign(scope, &canonical);
    debug!(string_to_sign = %to_sign.replace('\n', "\\n"), "sigv4 string to sign");

    let key = signing_key(secret_key, &scope.date_stamp(), scope.region, scope.service)?;
    let signature = hex::encode(hmac_sha256(&key, to_sign.as_bytes())?);

    Ok(Signature {
        signed_headers,
        credential_scope: scope.credential_scope(),
        signature,
    })
}
