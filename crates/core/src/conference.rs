//! Contract for the multi-party conference session.
//!
//! The orchestrator depends on two things only: connection-state events and
//! local microphone mute. Camera control and peer video notifications are
//! carried for the front end.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::broadcast;

#[cfg(test)]
use mockall::automock;

use crate::credential::CredentialProvider;

/// Connection state reported by the conference adapter. Observed, never set, by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConferenceConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConferenceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConferenceConnectionState::Connecting => "Connecting",
            ConferenceConnectionState::Connected => "Connected",
            ConferenceConnectionState::Reconnecting => "Reconnecting",
            ConferenceConnectionState::Closed => "Closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConferenceEvent {
    ConnectionChanged(ConferenceConnectionState),
    LocalAudioChanged { muted: bool },
    LocalVideoChanged { capturing: bool },
    PeerVideoChanged { user_id: u32, action: VideoAction },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConferenceSession: Send + Sync {
    async fn join(
        &self,
        session_name: &str,
        token: &SecretString,
        display_name: &str,
    ) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    async fn mute_local_audio(&self) -> Result<()>;

    async fn unmute_local_audio(&self) -> Result<()>;

    async fn start_local_video(&self) -> Result<()>;

    async fn stop_local_video(&self) -> Result<()>;

    fn events(&self) -> broadcast::Receiver<ConferenceEvent>;
}

/// Fetches a join token for `session_name` and joins with it.
pub async fn join_conference(
    conference: &dyn ConferenceSession,
    credentials: &dyn CredentialProvider,
    session_name: &str,
    display_name: &str,
) -> Result<()> {
    let token = credentials
        .conference_token(session_name)
        .await
        .context("fetching conference token")?;
    tracing::info!(session = session_name, "joining conference");
    conference
        .join(session_name, &token, display_name)
        .await
        .with_context(|| format!("joining conference session {}", session_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MockCredentialProvider;
    use crate::error::CredentialError;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn join_uses_the_fetched_token() {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_conference_token()
            .withf(|name| name == "standup")
            .times(1)
            .returning(|_| Ok(SecretString::from("jwt.abc".to_string())));

        let mut conference = MockConferenceSession::new();
        conference
            .expect_join()
            .withf(|name, token, display| {
                name == "standup" && token.expose_secret() == "jwt.abc" && display == "Ada"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        join_conference(&conference, &credentials, "standup", "Ada")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn token_failure_skips_join() {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_conference_token()
            .returning(|_| Err(CredentialError::Missing));

        let mut conference = MockConferenceSession::new();
        conference.expect_join().never();

        let err = join_conference(&conference, &credentials, "standup", "Ada")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("carried no token"));
    }
}
