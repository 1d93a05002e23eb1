//! AWS S3 (and S3-compatible) object medium.
//!
//! Requests are signed with AWS Signature Version 4. Credentials come from
//! configuration or, when unset, from the AWS default chain. Unsigned
//! requests are only sent to a custom endpoint.

use chrono::{DateTime, Utc};
use ipam_config::{S3Credentials, S3Settings};
use ipam_core::{IpamError, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::credentials::{self, EnvLookup};
use crate::http::{build_client, hmac_sha256, status_error, uri_encode_path, TransportError};
use crate::medium::Medium;

const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub struct S3Medium {
    client: Client,
    url: Url,
    host: String,
    region: String,
    location: String,
    credentials: Option<S3Credentials>,
}

impl S3Medium {
    pub fn new(settings: &S3Settings) -> Result<Self> {
        Self::with_env(settings, &credentials::process_env)
    }

    pub(crate) fn with_env(settings: &S3Settings, env: EnvLookup<'_>) -> Result<Self> {
        let key = uri_encode_path(&settings.object_key);

        // Custom endpoints use path-style addressing; AWS uses virtual-hosted style.
        let raw_url = match &settings.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                settings.bucket,
                key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                settings.bucket, settings.region, key
            ),
        };
        let url = Url::parse(&raw_url).map_err(|_| {
            IpamError::backend(
                "failed to configure s3 client",
                TransportError::Endpoint(raw_url.clone()),
            )
        })?;
        let host = host_header(&url).ok_or_else(|| {
            IpamError::backend(
                "failed to configure s3 client",
                TransportError::Endpoint(raw_url.clone()),
            )
        })?;
        let client = build_client(settings.skip_tls_verify)
            .map_err(|e| IpamError::backend("failed to create s3 client", e))?;

        let credentials = match &settings.credentials {
            Some(credentials) => Some(credentials.clone()),
            None => credentials::resolve(env, &client)
                .map_err(|e| IpamError::backend("failed to resolve aws credentials", e))?
                .map(|(credentials, source)| {
                    debug!(source = %source, "Resolved AWS credentials");
                    credentials
                }),
        };
        match (&credentials, &settings.endpoint) {
            (Some(_), _) => {}
            (None, Some(endpoint)) => {
                warn!(endpoint = %endpoint, "No AWS credentials found, sending unsigned requests")
            }
            (None, None) => {
                return Err(IpamError::backend(
                    "failed to configure s3 client",
                    TransportError::Credentials(
                        "no AWS credentials in configuration, environment, shared profile, \
                         container or instance metadata"
                            .into(),
                    ),
                ))
            }
        }

        debug!(
            url = %url,
            signed = credentials.is_some(),
            skip_tls_verify = settings.skip_tls_verify,
            "S3 medium configured"
        );

        Ok(Self {
            client,
            url,
            host,
            region: settings.region.clone(),
            location: format!("s3://{}/{}", settings.bucket, settings.object_key),
            credentials,
        })
    }

    fn send(&self, method: Method, body: Option<&[u8]>) -> std::result::Result<Response, TransportError> {
        let payload_hash = hex::encode(Sha256::digest(body.unwrap_or_default()));
        let amz_date = amz_date(Utc::now());

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = self
            .credentials
            .as_ref()
            .and_then(|c| c.session_token.clone())
        {
            headers.push(("x-amz-security-token".to_string(), token));
        }
        headers.sort();

        let mut builder = self.client.request(method.clone(), self.url.clone());
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(credentials) = &self.credentials {
            let authorization = sign_v4(&SigningInput {
                credentials,
                region: &self.region,
                service: "s3",
                method: method.as_str(),
                canonical_uri: self.url.path(),
                canonical_query: self.url.query().unwrap_or_default(),
                headers: &headers,
                payload_hash: &payload_hash,
                amz_date: &amz_date,
            })?;
            builder = builder.header(AUTHORIZATION, authorization);
        }

        if let Some(body) = body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        Ok(builder.send()?)
    }
}

impl Medium for S3Medium {
    fn describe(&self) -> String {
        self.location.clone()
    }

    fn fetch(&self) -> Result<Option<Vec<u8>>> {
        let context = || format!("failed to load storage object {}", self.location);
        let response = self
            .send(Method::GET, None)
            .map_err(|e| IpamError::backend(context(), e))?;

        if response.status().is_success() {
            let bytes = response
                .bytes()
                .map_err(|e| IpamError::backend("failed to read s3 object data", e))?;
            return Ok(Some(bytes.to_vec()));
        }

        let err = status_error(response, None);
        if err.code() == Some("NoSuchKey") {
            return Ok(None);
        }
        Err(IpamError::backend(context(), err))
    }

    fn publish(&self, bytes: &[u8]) -> Result<()> {
        let context = || format!("failed to upload s3 object {}", self.location);
        let response = self
            .send(Method::PUT, Some(bytes))
            .map_err(|e| IpamError::backend(context(), e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(IpamError::backend(context(), status_error(response, None)))
        }
    }
}

/// `Host` header value: host plus port when it is not the scheme default.
fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

pub(crate) struct SigningInput<'a> {
    pub credentials: &'a S3Credentials,
    pub region: &'a str,
    pub service: &'a str,
    pub method: &'a str,
    pub canonical_uri: &'a str,
    pub canonical_query: &'a str,
    /// Lowercase names, sorted by name.
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
    /// `YYYYMMDD'T'HHMMSS'Z'`
    pub amz_date: &'a str,
}

/// `Authorization` header value for a SigV4 request.
pub(crate) fn sign_v4(input: &SigningInput<'_>) -> std::result::Result<String, TransportError> {
    let date = input.amz_date.get(..8).ok_or_else(|| {
        TransportError::Credentials(format!("malformed request date '{}'", input.amz_date))
    })?;

    let canonical_headers: String = input
        .headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = input
        .headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        input.canonical_uri,
        input.canonical_query,
        canonical_headers,
        signed_headers,
        input.payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, input.region, input.service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        SIGNING_ALGORITHM,
        input.amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let secret = format!("AWS4{}", input.credentials.secret_access_key);
    let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, input.region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, input.service.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        SIGNING_ALGORITHM, input.credentials.access_key_id, scope, signed_headers, signature
    ))
}

/// Request timestamp in the SigV4 wire format.
pub(crate) fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}
