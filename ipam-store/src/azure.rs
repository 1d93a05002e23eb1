//! Azure Blob Storage medium.
//!
//! The account, endpoint and credentials come from a standard storage
//! connection string. Requests are authorized with the account key
//! (SharedKey) or by appending a shared access signature.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ipam_core::{IpamError, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use tracing::debug;

use crate::http::{build_client, hmac_sha256, status_error, uri_encode_path, TransportError};
use crate::medium::Medium;

const API_VERSION: &str = "2021-08-06";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Clone, PartialEq, Eq)]
pub(crate) enum Credential {
    SharedKey(Vec<u8>),
    Sas(String),
    Anonymous,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::SharedKey(_) => f.write_str("SharedKey(<redacted>)"),
            Credential::Sas(_) => f.write_str("Sas(<redacted>)"),
            Credential::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Parsed storage account connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AccountInfo {
    pub account: String,
    pub blob_endpoint: String,
    pub credential: Credential,
}

impl AccountInfo {
    pub(crate) fn parse(connection_string: &str) -> std::result::Result<Self, TransportError> {
        let fields: BTreeMap<String, String> = connection_string
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| {
                // Values (keys, signatures) may themselves contain '='.
                let (key, value) = part.split_once('=')?;
                Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();

        if fields
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            let key = BASE64
                .decode(DEV_ACCOUNT_KEY)
                .map_err(|e| TransportError::Credentials(e.to_string()))?;
            return Ok(Self {
                account: DEV_ACCOUNT.into(),
                blob_endpoint: DEV_BLOB_ENDPOINT.into(),
                credential: Credential::SharedKey(key),
            });
        }

        let account = fields.get("accountname").cloned().unwrap_or_default();

        let blob_endpoint = match fields.get("blobendpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                if account.is_empty() {
                    return Err(TransportError::Credentials(
                        "connection string has neither AccountName nor BlobEndpoint".into(),
                    ));
                }
                let protocol = fields
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = fields
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}")
            }
        };

        let credential = if let Some(key) = fields.get("accountkey") {
            if account.is_empty() {
                return Err(TransportError::Credentials(
                    "AccountKey requires AccountName".into(),
                ));
            }
            let decoded = BASE64
                .decode(key)
                .map_err(|e| TransportError::Credentials(format!("AccountKey is not base64: {e}")))?;
            Credential::SharedKey(decoded)
        } else if let Some(sas) = fields.get("sharedaccesssignature") {
            Credential::Sas(sas.trim_start_matches('?').to_string())
        } else {
            Credential::Anonymous
        };

        Ok(Self {
            account,
            blob_endpoint,
            credential,
        })
    }
}

pub struct AzureBlobMedium {
    client: Client,
    url: Url,
    account: String,
    credential: Credential,
    location: String,
}

impl AzureBlobMedium {
    pub fn new(connection_string: &str, container: &str, blob_name: &str) -> Result<Self> {
        let info = AccountInfo::parse(connection_string)
            .map_err(|e| IpamError::backend("failed to parse azure connection string", e))?;

        let mut raw_url = format!(
            "{}/{}/{}",
            info.blob_endpoint,
            uri_encode_path(container),
            uri_encode_path(blob_name)
        );
        if let Credential::Sas(token) = &info.credential {
            raw_url.push('?');
            raw_url.push_str(token);
        }
        let url = Url::parse(&raw_url).map_err(|_| {
            IpamError::backend(
                "failed to configure azure blob client",
                TransportError::Endpoint(info.blob_endpoint.clone()),
            )
        })?;

        let client = build_client(false)
            .map_err(|e| IpamError::backend("failed to create azure blob client", e))?;

        debug!(
            account = %info.account,
            container,
            blob = blob_name,
            credential = ?info.credential,
            "Azure blob medium configured"
        );

        Ok(Self {
            client,
            url,
            location: format!("azure://{}/{}/{}", info.account, container, blob_name),
            account: info.account,
            credential: info.credential,
        })
    }

    fn send(&self, method: Method, body: Option<&[u8]>) -> std::result::Result<Response, TransportError> {
        let mut ms_headers = vec![
            ("x-ms-date".to_string(), ms_date(Utc::now())),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        if body.is_some() {
            ms_headers.push(("x-ms-blob-type".to_string(), "BlockBlob".to_string()));
        }
        ms_headers.sort();

        let content_length = body.map(<[u8]>::len).unwrap_or(0);
        let content_type = if body.is_some() { "application/json" } else { "" };

        let mut builder = self.client.request(method.clone(), self.url.clone());
        for (name, value) in &ms_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Credential::SharedKey(key) = &self.credential {
            let string_to_sign = string_to_sign(&SharedKeyInput {
                method: method.as_str(),
                content_length,
                content_type,
                ms_headers: &ms_headers,
                account: &self.account,
                path: self.url.path(),
            });
            let signature = BASE64.encode(hmac_sha256(key, string_to_sign.as_bytes())?);
            builder = builder.header(
                AUTHORIZATION,
                format!("SharedKey {}:{}", self.account, signature),
            );
        }

        if let Some(body) = body {
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .body(body.to_vec());
        }

        Ok(builder.send()?)
    }
}

impl Medium for AzureBlobMedium {
    fn describe(&self) -> String {
        self.location.clone()
    }

    fn fetch(&self) -> Result<Option<Vec<u8>>> {
        let context = || format!("failed to download blob {}", self.location);
        let response = self
            .send(Method::GET, None)
            .map_err(|e| IpamError::backend(context(), e))?;

        if response.status().is_success() {
            let bytes = response
                .bytes()
                .map_err(|e| IpamError::backend("failed to read blob data", e))?;
            return Ok(Some(bytes.to_vec()));
        }

        let err = status_error(response, Some(ERROR_CODE_HEADER));
        if err.code() == Some("BlobNotFound") {
            return Ok(None);
        }
        Err(IpamError::backend(context(), err))
    }

    fn publish(&self, bytes: &[u8]) -> Result<()> {
        let context = || format!("failed to upload blob {}", self.location);
        let response = self
            .send(Method::PUT, Some(bytes))
            .map_err(|e| IpamError::backend(context(), e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(IpamError::backend(
                context(),
                status_error(response, Some(ERROR_CODE_HEADER)),
            ))
        }
    }
}

/// RFC 1123 timestamp used by `x-ms-date`.
pub(crate) fn ms_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) struct SharedKeyInput<'a> {
    pub method: &'a str,
    pub content_length: usize,
    pub content_type: &'a str,
    /// Lowercase `x-ms-*` headers, sorted by name.
    pub ms_headers: &'a [(String, String)],
    pub account: &'a str,
    /// Encoded URL path, starting with `/`.
    pub path: &'a str,
}

/// SharedKey string-to-sign for a request without query parameters.
pub(crate) fn string_to_sign(input: &SharedKeyInput<'_>) -> String {
    // Content-Length is empty for zero-length bodies.
    let content_length = match input.content_length {
        0 => String::new(),
        n => n.to_string(),
    };
    let canonical_headers: String = input
        .ms_headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();

    // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    // If-Unmodified-Since, Range.
    format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}/{}{}",
        input.method,
        content_length,
        input.content_type,
        canonical_headers,
        input.account,
        input.path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ipam_core::Pool;

    use crate::store::{IpamStore, PersistentStore};

    #[test]
    fn parses_account_key_connection_string() {
        let info = AccountInfo::parse(
            "DefaultEndpointsProtocol=https;AccountName=ipamstate;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(info.account, "ipamstate");
        assert_eq!(info.blob_endpoint, "https://ipamstate.blob.core.windows.net");
        assert_eq!(info.credential, Credential::SharedKey(b"secret".to_vec()));
    }

    #[test]
    fn explicit_blob_endpoint_and_sas() {
        let info = AccountInfo::parse(
            "BlobEndpoint=https://custom.example.net/;SharedAccessSignature=?sv=2021-08-06&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(info.blob_endpoint, "https://custom.example.net");
        assert_eq!(
            info.credential,
            Credential::Sas("sv=2021-08-06&sig=abc%3D".into())
        );
    }

    #[test]
    fn development_storage_shortcut() {
        let info = AccountInfo::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(info.account, DEV_ACCOUNT);
        assert_eq!(info.blob_endpoint, DEV_BLOB_ENDPOINT);
        assert!(matches!(info.credential, Credential::SharedKey(ref k) if k.len() == 64));
    }

    #[test]
    fn rejects_unusable_connection_strings() {
        assert!(AccountInfo::parse("").is_err());
        assert!(AccountInfo::parse("AccountName=a;AccountKey=not*base64").is_err());
        assert!(AccountInfo::parse("BlobEndpoint=https://x.example;AccountKey=c2VjcmV0").is_err());
    }

    #[test]
    fn blob_url_and_location() {
        let medium = AzureBlobMedium::new(
            "AccountName=ipamstate;AccountKey=c2VjcmV0",
            "state",
            "ipam-storage.json",
        )
        .unwrap();
        assert_eq!(
            medium.url.as_str(),
            "https://ipamstate.blob.core.windows.net/state/ipam-storage.json"
        );
        assert_eq!(medium.describe(), "azure://ipamstate/state/ipam-storage.json");
    }

    #[test]
    fn sas_token_is_appended_to_the_url() {
        let medium = AzureBlobMedium::new(
            "BlobEndpoint=https://custom.example.net;SharedAccessSignature=sv=1&sig=x",
            "state",
            "ipam.json",
        )
        .unwrap();
        assert_eq!(
            medium.url.as_str(),
            "https://custom.example.net/state/ipam.json?sv=1&sig=x"
        );
    }

    const BLOB_PATH: &str = "/devstoreaccount1/ipam/ipam-storage.json";

    fn medium_for(server: &mockito::Server) -> AzureBlobMedium {
        let connection_string = format!(
            "AccountName={DEV_ACCOUNT};AccountKey={DEV_ACCOUNT_KEY};BlobEndpoint={}/{DEV_ACCOUNT}",
            server.url()
        );
        AzureBlobMedium::new(&connection_string, "ipam", "ipam-storage.json").unwrap()
    }

    fn shared_key_header() -> mockito::Matcher {
        mockito::Matcher::Regex(r"^SharedKey devstoreaccount1:[A-Za-z0-9+/]+=*$".into())
    }

    #[test]
    fn missing_blob_loads_as_empty_store() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", BLOB_PATH)
            .match_header("authorization", shared_key_header())
            .match_header("x-ms-version", API_VERSION)
            .with_status(404)
            .with_header(ERROR_CODE_HEADER, "BlobNotFound")
            .create();

        let store = PersistentStore::open(medium_for(&server)).unwrap();
        assert!(store.list_pools().unwrap().is_empty());
        mock.assert();
    }

    #[test]
    fn missing_container_is_not_absence() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", BLOB_PATH)
            .with_status(404)
            .with_header(ERROR_CODE_HEADER, "ContainerNotFound")
            .create();

        let err = PersistentStore::open(medium_for(&server)).err().unwrap();
        assert!(matches!(err, IpamError::Backend { .. }));
        assert!(err.to_string().contains("ContainerNotFound"));
    }

    #[test]
    fn rejected_signature_fails_construction() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", BLOB_PATH)
            .with_status(403)
            .with_header(ERROR_CODE_HEADER, "AuthenticationFailed")
            .with_body("<Error><Code>AuthenticationFailed</Code><Message>Server failed to authenticate the request.</Message></Error>")
            .create();

        assert!(matches!(
            medium_for(&server).fetch(),
            Err(IpamError::Backend { .. })
        ));
        assert!(PersistentStore::open(medium_for(&server)).is_err());
    }

    #[test]
    fn existing_blob_is_returned() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", BLOB_PATH)
            .with_body(r#"{"pools":{},"allocations":{}}"#)
            .create();

        assert_eq!(
            medium_for(&server).fetch().unwrap().as_deref(),
            Some(&br#"{"pools":{},"allocations":{}}"#[..])
        );
    }

    #[test]
    fn failed_upload_leaves_store_unchanged() {
        let mut server = mockito::Server::new();
        let _get = server
            .mock("GET", BLOB_PATH)
            .with_status(404)
            .with_header(ERROR_CODE_HEADER, "BlobNotFound")
            .create();
        let put = server
            .mock("PUT", BLOB_PATH)
            .match_header("x-ms-blob-type", "BlockBlob")
            .match_header("authorization", shared_key_header())
            .with_status(500)
            .with_header(ERROR_CODE_HEADER, "InternalError")
            .create();

        let store = PersistentStore::open(medium_for(&server)).unwrap();
        let err = store
            .save_pool(&Pool::new("lab", ["10.0.0.0/16"]))
            .unwrap_err();
        put.assert();
        assert!(err.to_string().contains("InternalError"));
        assert!(store.get_pool("lab").unwrap_err().is_not_found());
    }

    #[test]
    fn sas_upload_carries_token_instead_of_signature() {
        let mut server = mockito::Server::new();
        let put = server
            .mock("PUT", "/ipam/ipam-storage.json")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("sv".into(), "2021-08-06".into()),
                mockito::Matcher::UrlEncoded("sig".into(), "abc".into()),
            ]))
            .match_header("authorization", mockito::Matcher::Missing)
            .match_header("x-ms-blob-type", "BlockBlob")
            .match_header("content-type", "application/json")
            .match_body("{}")
            .with_status(201)
            .create();

        let connection_string = format!(
            "BlobEndpoint={};SharedAccessSignature=sv=2021-08-06&sig=abc",
            server.url()
        );
        let medium = AzureBlobMedium::new(&connection_string, "ipam", "ipam-storage.json").unwrap();
        medium.publish(b"{}").unwrap();
        put.assert();
    }

    #[test]
    fn put_string_to_sign_layout() {
        let ms_headers = vec![
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
            ("x-ms-date".to_string(), "Fri, 26 Jun 2015 23:39:12 GMT".to_string()),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        let signed = string_to_sign(&SharedKeyInput {
            method: "PUT",
            content_length: 42,
            content_type: "application/json",
            ms_headers: &ms_headers,
            account: "ipamstate",
            path: "/state/ipam-storage.json",
        });
        assert_eq!(
            signed,
            "PUT\n\n\n42\n\napplication/json\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Fri, 26 Jun 2015 23:39:12 GMT\n\
             x-ms-version:2021-08-06\n\
             /ipamstate/state/ipam-storage.json"
        );
    }

    #[test]
    fn get_string_to_sign_leaves_length_empty() {
        let ms_headers = vec![("x-ms-version".to_string(), API_VERSION.to_string())];
        let signed = string_to_sign(&SharedKeyInput {
            method: "GET",
            content_length: 0,
            content_type: "",
            ms_headers: &ms_headers,
            account: DEV_ACCOUNT,
            path: "/devstoreaccount1/state/blob.json",
        });
        assert!(signed.starts_with("GET\n\n\n\n\n\n\n\n\n\n\n\n"));
        assert!(signed.ends_with("\n/devstoreaccount1/devstoreaccount1/state/blob.json"));
    }

    #[test]
    fn rfc1123_date() {
        let now = Utc.with_ymd_and_hms(2015, 6, 26, 23, 39, 12).unwrap();
        assert_eq!(ms_date(now), "Fri, 26 Jun 2015 23:39:12 GMT");
    }
}
