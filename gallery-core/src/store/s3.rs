use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::config::StoreSection;

use super::{ObjectStore, StoreError, StoreResult, StoredObject};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";
const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Clone)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl S3Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn from_env(access_key_env: &str, secret_key_env: &str) -> StoreResult<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| StoreError::Credentials(name.to_string()))
        };
        Ok(Self::new(read(access_key_env)?, read(secret_key_env)?))
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// AWS Signature Version 4 over the headers every request carries.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: S3Credentials,
    region: String,
}

/// Header values to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

impl SigV4Signer {
    pub fn new(credentials: S3Credentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    pub fn sign(
        &self,
        method: &Method,
        host: &str,
        canonical_uri: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<SignedHeaders> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let content_sha256 = hex::encode(Sha256::digest(payload));

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\nhost:{host}\nx-amz-content-sha256:{content_sha256}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{content_sha256}",
            method = method.as_str(),
        );
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let key = signing_key(&self.credentials.secret_key, &date, &self.region, SERVICE)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.credentials.access_key
        );
        Ok(SignedHeaders {
            authorization,
            amz_date,
            content_sha256,
        })
    }
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> StoreResult<Vec<u8>> {
    let date_key = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let region_key = hmac(&date_key, region.as_bytes())?;
    let service_key = hmac(&region_key, service.as_bytes())?;
    hmac(&service_key, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> StoreResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| StoreError::Signing)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encodes every byte outside the unreserved set, keeping `/`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// S3-compatible bucket (R2, MinIO, AWS) addressed path-style.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    endpoint: Url,
    bucket: String,
    signer: SigV4Signer,
}

impl S3Store {
    pub fn new(
        client: Client,
        endpoint: &str,
        bucket: impl Into<String>,
        region: impl Into<String>,
        credentials: S3Credentials,
    ) -> StoreResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|source| StoreError::Endpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            signer: SigV4Signer::new(credentials, region),
        })
    }

    /// Builds a store from config, reading credentials from the environment
    /// variables the config names.
    pub fn from_config(section: &StoreSection) -> StoreResult<Self> {
        let credentials = S3Credentials::from_env(&section.access_key_env, &section.secret_key_env)?;
        Self::new(
            Client::new(),
            &section.endpoint,
            section.bucket.clone(),
            section.region.clone(),
            credentials,
        )
    }

    fn canonical_uri(&self, key: &str) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        format!(
            "{base}/{}/{}",
            encode_key(&self.bucket),
            encode_key(key.trim_start_matches('/'))
        )
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn request(&self, method: Method, key: &str, payload: &[u8]) -> StoreResult<RequestBuilder> {
        let canonical_uri = self.canonical_uri(key);
        let signed = self
            .signer
            .sign(&method, &self.host(), &canonical_uri, payload, Utc::now())?;
        let mut url = self.endpoint.clone();
        url.set_path(&canonical_uri);
        debug!(method = %method, url = %url, "store request");
        Ok(self
            .client
            .request(method, url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256))
    }
}

async fn status_error(key: &str, response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Status {
        key: key.to_string(),
        status,
        body,
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let response = self.request(Method::HEAD, key, &[])?.send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(key, response).await),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> StoreResult<()> {
        let response = self
            .request(Method::PUT, key, &bytes)?
            .header("content-type", mime_type)
            .body(bytes)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(key, response).await)
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        let response = self.request(Method::GET, key, &[])?.send().await?;
        match response.status() {
            status if status.is_success() => {
                let mime_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or(DEFAULT_MIME)
                    .to_string();
                let bytes = response.bytes().await?.to_vec();
                Ok(Some(StoredObject { bytes, mime_type }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(key, response).await),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let response = self.request(Method::DELETE, key, &[])?.send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error(key, response).await),
        }
    }
}
