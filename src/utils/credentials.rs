//! Password substitution for cloud connection URLs.
//!
//! Cloud URLs are copied from the hosting dashboard in one of three shapes: with a
//! `[YOUR-PASSWORD]` placeholder, with the password already embedded, or with no password at
//! all. [`resolve_cloud_url`] normalizes all three into a URL carrying the percent-encoded
//! password; backup and restore both go through it.

use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::errors::EngineError;
use crate::model::ConnectionDescriptor;

pub const PASSWORD_PLACEHOLDER: &str = "[YOUR-PASSWORD]";

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";
const DEFAULT_DATABASE: &str = "postgres";

/// Percent-encodes a password for use in the userinfo part of a URL.
pub fn encode_password(password: &str) -> String {
    byte_serialize(password.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Returns `url` with `password` embedded, URL-encoded.
pub fn resolve_cloud_url(url: &str, password: &str) -> Result<String, EngineError> {
    if password.is_empty() {
        return Err(EngineError::ConfigInvalid("cloud password is empty".into()));
    }
    let encoded = encode_password(password);

    if url.contains(PASSWORD_PLACEHOLDER) {
        return Ok(url.replacen(PASSWORD_PLACEHOLDER, &encoded, 1));
    }

    let mut parsed = parse(url)?;
    if let Some(existing) = parsed.password() {
        if existing == encoded || existing == password {
            return Ok(url.to_string());
        }
    }

    if parsed.username().is_empty() {
        parsed
            .set_username(DEFAULT_USER)
            .map_err(|_| invalid_url(url))?;
    }
    parsed
        .set_password(Some(password))
        .map_err(|_| invalid_url(url))?;
    Ok(parsed.to_string())
}

/// Splits a resolved connection URL into a descriptor. `password` is the raw (unencoded) value.
pub fn descriptor_from_url(url: &str, password: &str) -> Result<ConnectionDescriptor, EngineError> {
    let parsed = parse(url)?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EngineError::ConfigInvalid("cloud url has no host".into()))?;
    let user = match parsed.username() {
        "" => DEFAULT_USER.to_string(),
        name => name.to_string(),
    };
    let database = match parsed.path().trim_start_matches('/') {
        "" => DEFAULT_DATABASE.to_string(),
        name => name.to_string(),
    };

    Ok(ConnectionDescriptor {
        host: host.to_string(),
        port: parsed.port().unwrap_or(DEFAULT_PORT),
        user,
        password: password.to_string(),
        database,
        is_running: true,
    })
}

/// The URL with any password removed, safe for argv and logs.
pub fn strip_password(url: &str) -> Result<String, EngineError> {
    let mut parsed = parse(url)?;
    if parsed.password().is_some() {
        parsed.set_password(None).map_err(|_| invalid_url(url))?;
    }
    Ok(parsed.to_string())
}

fn parse(url: &str) -> Result<Url, EngineError> {
    Url::parse(url.trim()).map_err(|_| invalid_url(url))
}

fn invalid_url(url: &str) -> EngineError {
    let shown = strip_for_message(url);
    EngineError::ConfigInvalid(format!("invalid connection url: {}", shown))
}

// Best-effort redaction for urls that failed to parse.
fn strip_for_message(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://*****{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
