//! Short-lived credentials for both sessions.
//!
//! The provider is stateless: every call is a fresh one-shot request and
//! retries are the caller's business.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

#[cfg(test)]
use mockall::automock;

use crate::error::CredentialError;

/// Opaque bearer credential for a single agent connect attempt. Never persisted.
#[derive(Clone)]
pub struct EphemeralKey(SecretString);

impl EphemeralKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn secret(&self) -> &SecretString {
        &self.0
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralKey([REDACTED])")
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetches an ephemeral key for the conversational agent session.
    async fn agent_key(&self) -> Result<EphemeralKey, CredentialError>;

    /// Fetches a join token for the conference session named `session_name`.
    async fn conference_token(&self, session_name: &str) -> Result<SecretString, CredentialError>;
}

#[derive(Deserialize)]
struct ClientSecret {
    value: Option<String>,
}

#[derive(Deserialize)]
struct AgentKeyResponse {
    client_secret: Option<ClientSecret>,
}

#[derive(Deserialize)]
struct ConferenceTokenResponse {
    token: String,
}

/// Extracts `client_secret.value` from the session endpoint's body.
///
/// An absent or empty value is `Missing`; a body that isn't JSON is `Malformed`.
pub fn parse_agent_key(body: &str) -> Result<EphemeralKey, CredentialError> {
    let response: AgentKeyResponse =
        serde_json::from_str(body).map_err(|e| CredentialError::Malformed(e.to_string()))?;
    match response.client_secret.and_then(|secret| secret.value) {
        Some(value) if !value.is_empty() => Ok(EphemeralKey::new(value)),
        _ => Err(CredentialError::Missing),
    }
}

/// Accepts either `{"token": "..."}` or the bare token as the whole body.
pub fn parse_conference_token(body: &str) -> Result<SecretString, CredentialError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(CredentialError::Missing);
    }
    if trimmed.starts_with('{') {
        let response: ConferenceTokenResponse = serde_json::from_str(trimmed)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if response.token.is_empty() {
            return Err(CredentialError::Missing);
        }
        return Ok(SecretString::from(response.token));
    }
    Ok(SecretString::from(trimmed.to_string()))
}

/// Fetches both credentials from plain HTTP endpoints.
pub struct HttpCredentialProvider {
    http: reqwest::Client,
    agent_url: String,
    conference_url: Option<String>,
}

impl HttpCredentialProvider {
    pub fn new(agent_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            agent_url: agent_url.into(),
            conference_url: None,
        }
    }

    pub fn with_conference_url(mut self, url: impl Into<String>) -> Self {
        self.conference_url = Some(url.into());
        self
    }

    async fn get_text(&self, request: reqwest::RequestBuilder) -> Result<String, CredentialError> {
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn agent_key(&self) -> Result<EphemeralKey, CredentialError> {
        tracing::debug!(url = %self.agent_url, "requesting ephemeral key");
        let body = self.get_text(self.http.get(&self.agent_url)).await?;
        parse_agent_key(&body)
    }

    async fn conference_token(&self, session_name: &str) -> Result<SecretString, CredentialError> {
        let url = self
            .conference_url
            .as_deref()
            .ok_or(CredentialError::NotConfigured("conference token"))?;
        let body = self
            .get_text(self.http.get(url).query(&[("session", session_name)]))
            .await?;
        parse_conference_token(&body)
    }
}
