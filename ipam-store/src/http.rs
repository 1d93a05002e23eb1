//! Blocking HTTP plumbing shared by the object and blob media.

use hmac::{Hmac, Mac};
use reqwest::blocking::{Client, Response};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Transport-level failure of a remote medium.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}{}: {message}", code_suffix(.code))]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid endpoint '{0}'")]
    Endpoint(String),

    #[error("invalid credentials: {0}")]
    Credentials(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

pub(crate) fn build_client(skip_tls_verify: bool) -> Result<Client, TransportError> {
    Ok(Client::builder()
        .danger_accept_invalid_certs(skip_tls_verify)
        .build()?)
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TransportError::Credentials(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode an object path, keeping `/` separators and unreserved characters.
pub(crate) fn uri_encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Turn a non-success response into a [`TransportError::Status`], reading the
/// service error code from `code_header` or from an XML `<Code>` element.
pub(crate) fn status_error(response: Response, code_header: Option<&str>) -> TransportError {
    let status = response.status().as_u16();
    let header_code = code_header
        .and_then(|name| response.headers().get(name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().unwrap_or_default();
    let code = header_code.or_else(|| xml_element(&body, "Code"));
    let message = xml_element(&body, "Message").unwrap_or_else(|| truncate(&body, 256));
    TransportError::Status {
        status,
        code,
        message,
    }
}

impl TransportError {
    /// Service error code, when the response carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

fn xml_element(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
