//! Participant registration against the URL encoded in a scan.

use log::debug;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Why a registration failed.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The scan is not a URL.
    #[error("Invalid QR code URL format")]
    InvalidUrl,

    /// The scan is a URL but not HTTPS.
    #[error("Only HTTPS URLs are allowed")]
    InsecureUrl,

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {reason}")]
    Http {
        /// Status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// The request could not be completed.
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body is not JSON.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    /// The response lacks the participant's name.
    #[error("Response missing required fields: participant.firstName and participant.lastName")]
    MissingParticipant,
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
}

/// Parse and check a scanned registration URL.
///
/// Only `https` URLs are accepted; nothing is requested for anything else.
pub fn validate_url(scan: &str) -> Result<Url, RegistrationError> {
    let url = Url::parse(scan.trim()).map_err(|_| RegistrationError::InvalidUrl)?;
    if url.scheme() != "https" {
        return Err(RegistrationError::InsecureUrl);
    }
    Ok(url)
}

/// Extract the participant from a registration response.
pub fn parse_participant(body: &Value) -> Result<Participant, RegistrationError> {
    let field = |name: &str| {
        body.get("participant")
            .and_then(|p| p.get(name))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match (field("firstName"), field("lastName")) {
        (Some(first_name), Some(last_name)) => Ok(Participant {
            first_name,
            last_name,
        }),
        _ => Err(RegistrationError::MissingParticipant),
    }
}

/// Blocking HTTPS client for registration requests.
pub struct RegistrationClient {
    http: Client,
}

impl RegistrationClient {
    /// Build a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, RegistrationError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scanlink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Register the participant behind `scan`, authenticating with `token`.
    pub fn register(&self, scan: &str, token: &str) -> Result<Participant, RegistrationError> {
        let url = validate_url(scan)?;
        debug!("Requesting registration at {url}");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .send()?;

        let status = response.status();
        debug!("Registration response: {status}");
        if !status.is_success() {
            return Err(RegistrationError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body: Value = response.json().map_err(|e| {
            if e.is_decode() {
                RegistrationError::InvalidBody(e.to_string())
            } else {
                RegistrationError::Transport(e)
            }
        })?;
        parse_participant(&body)
    }
}
