//! AWS credential resolution for the S3 medium.
//!
//! Sources follow the AWS default chain: environment variables, the shared
//! credentials and config files, container credentials, then the EC2
//! instance metadata service. Credentials are resolved once, when the
//! medium is built, and are not refreshed.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipam_config::S3Credentials;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::http::{status_error, TransportError};

const DEFAULT_PROFILE: &str = "default";
const CONTAINER_HOST: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";
const IMDS_TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const IMDS_TIMEOUT: Duration = Duration::from_secs(1);

/// Environment variable lookup, injectable for tests.
pub(crate) type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads the process environment.
pub(crate) fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CredentialSource {
    Environment,
    Profile(String),
    Container,
    InstanceMetadata,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => f.write_str("environment"),
            CredentialSource::Profile(name) => write!(f, "profile '{name}'"),
            CredentialSource::Container => f.write_str("container"),
            CredentialSource::InstanceMetadata => f.write_str("instance metadata"),
        }
    }
}

/// Walk the default chain. `Ok(None)` means no source had credentials.
pub(crate) fn resolve(
    env: EnvLookup<'_>,
    client: &Client,
) -> Result<Option<(S3Credentials, CredentialSource)>, TransportError> {
    if let Some(credentials) = from_env(env) {
        return Ok(Some((credentials, CredentialSource::Environment)));
    }
    if let Some((credentials, profile)) = from_profile(env)? {
        return Ok(Some((credentials, CredentialSource::Profile(profile))));
    }
    if let Some(credentials) = from_container(env, client)? {
        return Ok(Some((credentials, CredentialSource::Container)));
    }
    if let Some(credentials) = from_instance_metadata(env, client)? {
        return Ok(Some((credentials, CredentialSource::InstanceMetadata)));
    }
    Ok(None)
}

fn non_empty(env: EnvLookup<'_>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.trim().is_empty())
}

fn from_env(env: EnvLookup<'_>) -> Option<S3Credentials> {
    Some(S3Credentials {
        access_key_id: non_empty(env, "AWS_ACCESS_KEY_ID")?,
        secret_access_key: non_empty(env, "AWS_SECRET_ACCESS_KEY")?,
        session_token: non_empty(env, "AWS_SESSION_TOKEN"),
    })
}

fn from_profile(env: EnvLookup<'_>) -> Result<Option<(S3Credentials, String)>, TransportError> {
    let explicit = non_empty(env, "AWS_PROFILE");
    let profile = explicit.clone().unwrap_or_else(|| DEFAULT_PROFILE.into());
    let home = non_empty(env, "HOME").or_else(|| non_empty(env, "USERPROFILE"));
    let aws_dir = home.map(|h| Path::new(&h).join(".aws"));

    let credentials_file = non_empty(env, "AWS_SHARED_CREDENTIALS_FILE")
        .map(PathBuf::from)
        .or_else(|| aws_dir.as_ref().map(|d| d.join("credentials")));
    let config_file = non_empty(env, "AWS_CONFIG_FILE")
        .map(PathBuf::from)
        .or_else(|| aws_dir.as_ref().map(|d| d.join("config")));

    // The credentials file names sections after the profile; the config file
    // prefixes every profile except the default one.
    let config_section = if profile == DEFAULT_PROFILE {
        profile.clone()
    } else {
        format!("profile {profile}")
    };

    let mut profile_seen = false;
    for (path, section) in [
        (credentials_file, profile.clone()),
        (config_file, config_section),
    ] {
        let Some(path) = path else { continue };
        let Some(sections) = read_profile_file(&path)? else {
            continue;
        };
        if let Some(values) = sections.get(&section) {
            profile_seen = true;
            if let Some(credentials) = static_keys(values) {
                debug!(profile = %profile, file = %path.display(), "Using shared profile credentials");
                return Ok(Some((credentials, profile)));
            }
        }
    }

    if explicit.is_some() && !profile_seen {
        return Err(TransportError::Credentials(format!(
            "profile '{profile}' not found in the shared credentials or config file"
        )));
    }
    if profile_seen {
        debug!(profile = %profile, "Profile carries no static keys");
    }
    Ok(None)
}

fn read_profile_file(
    path: &Path,
) -> Result<Option<HashMap<String, HashMap<String, String>>>, TransportError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse_profile_file(&text))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(TransportError::Credentials(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

/// INI sections of a shared credentials or config file.
pub(crate) fn parse_profile_file(text: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    sections
}

fn static_keys(values: &HashMap<String, String>) -> Option<S3Credentials> {
    let get = |key: &str| values.get(key).filter(|v| !v.is_empty()).cloned();
    Some(S3Credentials {
        access_key_id: get("aws_access_key_id")?,
        secret_access_key: get("aws_secret_access_key")?,
        session_token: get("aws_session_token"),
    })
}

/// Temporary credentials served by the container and instance endpoints.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialsDocument {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
}

fn parse_document(body: &str) -> Result<S3Credentials, TransportError> {
    let doc: CredentialsDocument = serde_json::from_str(body)
        .map_err(|e| TransportError::Credentials(format!("malformed credentials document: {e}")))?;
    Ok(S3Credentials {
        access_key_id: doc.access_key_id,
        secret_access_key: doc.secret_access_key,
        session_token: doc.token,
    })
}

fn from_container(
    env: EnvLookup<'_>,
    client: &Client,
) -> Result<Option<S3Credentials>, TransportError> {
    let url = match non_empty(env, "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
        Some(relative) => format!("{CONTAINER_HOST}{relative}"),
        None => match non_empty(env, "AWS_CONTAINER_CREDENTIALS_FULL_URI") {
            Some(full) => full,
            None => return Ok(None),
        },
    };

    let token = match non_empty(env, "AWS_CONTAINER_AUTHORIZATION_TOKEN") {
        Some(token) => Some(token),
        None => match non_empty(env, "AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE") {
            Some(path) => Some(
                fs::read_to_string(&path)
                    .map_err(|e| {
                        TransportError::Credentials(format!("failed to read {path}: {e}"))
                    })?
                    .trim()
                    .to_string(),
            ),
            None => None,
        },
    };

    let mut request = client.get(&url);
    if let Some(token) = token {
        request = request.header(AUTHORIZATION, token);
    }
    let response = request.send()?;
    if !response.status().is_success() {
        return Err(status_error(response, None));
    }
    debug!(url = %url, "Using container credentials");
    parse_document(&response.text()?).map(Some)
}

fn from_instance_metadata(
    env: EnvLookup<'_>,
    client: &Client,
) -> Result<Option<S3Credentials>, TransportError> {
    if non_empty(env, "AWS_EC2_METADATA_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return Ok(None);
    }
    let base = non_empty(env, "AWS_EC2_METADATA_SERVICE_ENDPOINT")
        .unwrap_or_else(|| IMDS_ENDPOINT.into());
    let base = base.trim_end_matches('/');

    // Anything short of a token means we are not on an instance.
    let token = match client
        .put(format!("{base}/latest/api/token"))
        .header(IMDS_TOKEN_TTL_HEADER, "21600")
        .timeout(IMDS_TIMEOUT)
        .send()
    {
        Ok(response) if response.status().is_success() => response.text()?,
        Ok(response) => {
            debug!(status = response.status().as_u16(), "Instance metadata token refused");
            return Ok(None);
        }
        Err(err) => {
            debug!(error = %err, "Instance metadata service unreachable");
            return Ok(None);
        }
    };

    let roles_url = format!("{base}/latest/meta-data/iam/security-credentials/");
    let Some(roles) = metadata_get(client, &roles_url, &token)? else {
        return Ok(None);
    };
    let Some(role) = roles.lines().map(str::trim).find(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let Some(body) = metadata_get(client, &format!("{roles_url}{role}"), &token)? else {
        return Ok(None);
    };
    debug!(role, "Using instance profile credentials");
    parse_document(&body).map(Some)
}

/// `Ok(None)` on 404, which IMDS returns when no role is attached.
fn metadata_get(client: &Client, url: &str, token: &str) -> Result<Option<String>, TransportError> {
    let response = client
        .get(url)
        .header(IMDS_TOKEN_HEADER, token)
        .timeout(IMDS_TIMEOUT)
        .send()?;
    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        status if status.is_success() => Ok(Some(response.text()?)),
        _ => Err(status_error(response, None)),
    }
}
