use std::time::Duration;

use thiserror::Error;

/// Failures while obtaining a short-lived credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential response carried no token")]
    Missing,
    #[error("malformed credential response: {0}")]
    Malformed(String),
    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credential request timed out after {0:?}")]
    Timeout(Duration),
    #[error("no credential endpoint configured for {0}")]
    NotConfigured(&'static str),
}

/// Everything the orchestrator can log. None of these are returned to callers;
/// the session status is the only user-visible signal.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("agent connect failed: {0}")]
    Connect(String),
    #[error("stale resolution for attempt {attempt} discarded (current attempt {current})")]
    Stale { attempt: u64, current: u64 },
    #[error("{effect} failed: {reason}")]
    SideEffect { effect: String, reason: String },
}

impl SessionError {
    pub fn side_effect(effect: impl Into<String>, err: &anyhow::Error) -> Self {
        SessionError::SideEffect {
            effect: effect.into(),
            reason: format!("{:#}", err),
        }
    }
}
