//! Credential acquisition.
//!
//! Credentials come from either a central auth service (preferred when
//! configured) or directly from configuration. The broker client only ever
//! sees the resolved [`Credentials`] pair.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::AuthConfig;

/// Resolved credential pair for broker API calls.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub access_token: String,
}

/// Credential record served by the auth service. Missing fields deserialize
/// to their zero values and are caught by validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthServiceCredentials {
    pub id: i64,
    pub broker: String,
    pub api_key: String,
    pub api_secret: String,
    pub session_token: String,
    pub is_active: bool,
    pub account_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth service unreachable: {0}")]
    ServiceUnreachable(String),

    #[error("auth service returned HTTP {status}: {body}")]
    ServiceError { status: u16, body: String },

    #[error("auth service response malformed: {0}")]
    MalformedResponse(String),

    #[error("auth service returned incomplete credentials for broker '{broker}'")]
    IncompleteCredentials { broker: String },

    #[error("auth service credentials for broker '{broker}' are inactive")]
    InactiveCredentials { broker: String },

    #[error("no usable credentials: configure the auth service or set api_key and session_token")]
    NoCredentials,
}

/// Client for the central auth service.
pub struct AuthClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url,
            api_key: api_key.into(),
            client,
        }
    }

    /// Fetch credentials for `broker`, validating completeness and the
    /// active flag.
    pub fn broker_credentials(&self, broker: &str) -> Result<AuthServiceCredentials, AuthError> {
        let url = format!("{}auth/{broker}/credentials?service=true", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .send()
            .map_err(|e| AuthError::ServiceUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AuthError::ServiceError {
                status: status.as_u16(),
                body,
            });
        }

        let credentials: AuthServiceCredentials = response
            .json()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        validate(credentials, broker)
    }
}

fn validate(
    credentials: AuthServiceCredentials,
    broker: &str,
) -> Result<AuthServiceCredentials, AuthError> {
    if credentials.api_key.is_empty()
        || credentials.api_secret.is_empty()
        || credentials.session_token.is_empty()
    {
        return Err(AuthError::IncompleteCredentials {
            broker: broker.to_string(),
        });
    }
    if !credentials.is_active {
        return Err(AuthError::InactiveCredentials {
            broker: broker.to_string(),
        });
    }
    Ok(credentials)
}

/// Resolve the credential pair: auth service first, then direct config.
///
/// A failing auth service falls back to direct credentials when those are
/// present; otherwise the service error surfaces as-is.
pub fn resolve_credentials(config: &AuthConfig) -> Result<Credentials, AuthError> {
    if !config.auth_service_url.is_empty() {
        let client = AuthClient::new(&config.auth_service_url, &config.auth_service_api_key);
        match client.broker_credentials(&config.broker_name) {
            Ok(creds) => {
                return Ok(Credentials {
                    api_key: creds.api_key,
                    access_token: creds.session_token,
                })
            }
            Err(err) if config.api_key.is_empty() || config.session_token.is_empty() => {
                return Err(err)
            }
            Err(_) => {}
        }
    }

    if !config.api_key.is_empty() && !config.session_token.is_empty() {
        return Ok(Credentials {
            api_key: config.api_key.clone(),
            access_token: config.session_token.clone(),
        });
    }

    Err(AuthError::NoCredentials)
}
