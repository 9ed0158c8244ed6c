//! Session provisioning client.
//!
//! Two HTTP collaborators gate a session: the provisioning endpoint, which
//! accepts the full session configuration as JSON and returns the
//! short-lived bearer credential plus the provider session id, and the
//! negotiation endpoint, which exchanges SDP (handled by the transport
//! layer). This module owns the first.

use serde::Deserialize;
use tracing::debug;

use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult};

/// Default provisioning endpoint (mints the ephemeral credential).
pub const DEFAULT_SESSION_ENDPOINT: &str = "https://api.openai.com/v1/realtime/sessions";

/// Default negotiation endpoint (SDP offer/answer exchange).
pub const DEFAULT_NEGOTIATION_ENDPOINT: &str = "https://api.openai.com/v1/realtime";

/// Endpoints for the session's outbound HTTP collaborators.
#[derive(Debug, Clone)]
pub struct SessionEndpoints {
    /// Provisioning endpoint URL.
    pub session_endpoint: String,
    /// Negotiation endpoint URL.
    pub negotiation_endpoint: String,
}

impl Default for SessionEndpoints {
    fn default() -> Self {
        Self {
            session_endpoint: DEFAULT_SESSION_ENDPOINT.to_string(),
            negotiation_endpoint: DEFAULT_NEGOTIATION_ENDPOINT.to_string(),
        }
    }
}

/// Short-lived bearer credential minted per session.
#[derive(Debug, Clone)]
pub struct EphemeralCredential {
    /// Bearer secret presented to the negotiation endpoint.
    pub secret: String,
    /// Provider-assigned session identifier.
    pub session_id: Option<String>,
    /// Expiry timestamp (seconds since epoch), when the endpoint reports one.
    pub expires_at: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    client_secret: ClientSecret,
}

/// The secret arrives either as a bare string or as an object carrying an
/// expiry alongside the value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientSecret {
    Object {
        value: String,
        #[serde(default)]
        expires_at: Option<u64>,
    },
    Plain(String),
}

/// Client for the provisioning endpoint.
#[derive(Debug, Clone)]
pub struct ProvisionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ProvisionClient {
    /// Create a provisioning client for the given endpoint.
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    /// POST the session configuration and mint an ephemeral credential.
    pub async fn mint_credential(
        &self,
        config: &SessionConfig,
    ) -> SessionResult<EphemeralCredential> {
        debug!(endpoint = %self.endpoint, "requesting ephemeral credential");

        let response = self
            .http
            .post(&self.endpoint)
            .json(config)
            .send()
            .await
            .map_err(|e| SessionError::TokenIssuance(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::TokenIssuance(format!(
                "provisioning endpoint returned {status}: {body}"
            )));
        }

        let parsed: ProvisionResponse = response
            .json()
            .await
            .map_err(|e| SessionError::TokenIssuance(format!("invalid response: {e}")))?;

        let (secret, expires_at) = match parsed.client_secret {
            ClientSecret::Object { value, expires_at } => (value, expires_at),
            ClientSecret::Plain(value) => (value, None),
        };

        if secret.is_empty() {
            return Err(SessionError::TokenIssuance(
                "provisioning endpoint returned an empty credential".to_string(),
            ));
        }

        Ok(EphemeralCredential {
            secret,
            session_id: parsed.session_id.or(parsed.id),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints() {
        let endpoints = SessionEndpoints::default();
        assert!(endpoints.session_endpoint.contains("/realtime/sessions"));
        assert!(endpoints.negotiation_endpoint.ends_with("/realtime"));
    }

    #[test]
    fn test_provision_response_nested_secret() {
        let json = r#"{
            "id": "sess_123",
            "client_secret": { "value": "ek_abc", "expires_at": 1712345678 }
        }"#;
        let parsed: ProvisionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("sess_123"));
        match parsed.client_secret {
            ClientSecret::Object { value, expires_at } => {
                assert_eq!(value, "ek_abc");
                assert_eq!(expires_at, Some(1712345678));
            }
            ClientSecret::Plain(_) => panic!("expected object form"),
        }
    }

    #[test]
    fn test_provision_response_plain_secret() {
        let json = r#"{ "session_id": "s1", "client_secret": "ek_plain" }"#;
        let parsed: ProvisionResponse = serde_json::from_str(json).unwrap();
        match parsed.client_secret {
            ClientSecret::Plain(value) => assert_eq!(value, "ek_plain"),
            ClientSecret::Object { .. } => panic!("expected plain form"),
        }
    }
}
