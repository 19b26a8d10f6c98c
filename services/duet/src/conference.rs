//! A loopback conference session.
//!
//! Stands in for a real conferencing SDK: joining walks through
//! `Connecting -> Connected`, local mic and camera toggles are reported back
//! as events, and the console can inject network drops and peer video changes.

use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use duet_core::conference::{
    ConferenceConnectionState, ConferenceEvent, ConferenceSession, VideoAction,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct LocalMedia {
    session: Option<String>,
    audio_muted: bool,
    video_capturing: bool,
}

pub struct LoopbackConference {
    media: Mutex<LocalMedia>,
    events: broadcast::Sender<ConferenceEvent>,
}

impl Default for LoopbackConference {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConference {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            media: Mutex::new(LocalMedia::default()),
            events,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.media
            .lock()
            .map(|media| media.session.is_some())
            .unwrap_or(false)
    }

    pub fn is_audio_muted(&self) -> bool {
        self.media
            .lock()
            .map(|media| media.audio_muted)
            .unwrap_or(false)
    }

    pub fn is_video_capturing(&self) -> bool {
        self.media
            .lock()
            .map(|media| media.video_capturing)
            .unwrap_or(false)
    }

    /// Simulates the transport dropping and recovering.
    pub fn simulate_network_drop(&self) -> Result<()> {
        self.require_joined()?;
        self.emit(ConferenceEvent::ConnectionChanged(
            ConferenceConnectionState::Reconnecting,
        ));
        self.emit(ConferenceEvent::ConnectionChanged(
            ConferenceConnectionState::Connected,
        ));
        Ok(())
    }

    pub fn simulate_peer_video(&self, user_id: u32, action: VideoAction) -> Result<()> {
        self.require_joined()?;
        self.emit(ConferenceEvent::PeerVideoChanged { user_id, action });
        Ok(())
    }

    fn emit(&self, event: ConferenceEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("no subscriber for conference event");
        }
    }

    fn require_joined(&self) -> Result<()> {
        if self.is_joined() {
            Ok(())
        } else {
            Err(anyhow!("not in a conference session"))
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut LocalMedia) -> T) -> Result<T> {
        let mut media = self
            .media
            .lock()
            .map_err(|_| anyhow!("conference state poisoned"))?;
        if media.session.is_none() {
            bail!("not in a conference session");
        }
        Ok(f(&mut media))
    }
}

#[async_trait]
impl ConferenceSession for LoopbackConference {
    async fn join(
        &self,
        session_name: &str,
        token: &SecretString,
        display_name: &str,
    ) -> Result<()> {
        if token.expose_secret().is_empty() {
            bail!("empty conference token");
        }
        {
            let mut media = self
                .media
                .lock()
                .map_err(|_| anyhow!("conference state poisoned"))?;
            if let Some(current) = &media.session {
                bail!("already in conference session {}", current);
            }
            media.session = Some(session_name.to_string());
            media.audio_muted = false;
            media.video_capturing = false;
        }
        tracing::info!(session = session_name, user = display_name, "joined conference");
        self.emit(ConferenceEvent::ConnectionChanged(
            ConferenceConnectionState::Connecting,
        ));
        self.emit(ConferenceEvent::ConnectionChanged(
            ConferenceConnectionState::Connected,
        ));
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        let left = self
            .media
            .lock()
            .map_err(|_| anyhow!("conference state poisoned"))?
            .session
            .take();
        if let Some(session) = left {
            tracing::info!(session = %session, "left conference");
            self.emit(ConferenceEvent::ConnectionChanged(
                ConferenceConnectionState::Closed,
            ));
        }
        Ok(())
    }

    async fn mute_local_audio(&self) -> Result<()> {
        self.update(|media| media.audio_muted = true)?;
        self.emit(ConferenceEvent::LocalAudioChanged { muted: true });
        Ok(())
    }

    async fn unmute_local_audio(&self) -> Result<()> {
        self.update(|media| media.audio_muted = false)?;
        self.emit(ConferenceEvent::LocalAudioChanged { muted: false });
        Ok(())
    }

    async fn start_local_video(&self) -> Result<()> {
        self.update(|media| media.video_capturing = true)?;
        self.emit(ConferenceEvent::LocalVideoChanged { capturing: true });
        Ok(())
    }

    async fn stop_local_video(&self) -> Result<()> {
        self.update(|media| media.video_capturing = false)?;
        self.emit(ConferenceEvent::LocalVideoChanged { capturing: false });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ConferenceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SecretString {
        SecretString::from("jwt".to_string())
    }

    fn drain(rx: &mut broadcast::Receiver<ConferenceEvent>) -> Vec<ConferenceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn join_and_leave_report_connection_changes() {
        let conference = LoopbackConference::new();
        let mut rx = conference.events();

        conference.join("test", &token(), "Ada").await.unwrap();
        conference.leave().await.unwrap();
        conference.leave().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                ConferenceEvent::ConnectionChanged(ConferenceConnectionState::Connecting),
                ConferenceEvent::ConnectionChanged(ConferenceConnectionState::Connected),
                ConferenceEvent::ConnectionChanged(ConferenceConnectionState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn double_join_is_rejected() {
        let conference = LoopbackConference::new();
        conference.join("test", &token(), "Ada").await.unwrap();
        assert!(conference.join("other", &token(), "Ada").await.is_err());
    }

    #[tokio::test]
    async fn media_toggles_require_a_session() {
        let conference = LoopbackConference::new();
        assert!(conference.mute_local_audio().await.is_err());
        assert!(conference.start_local_video().await.is_err());
    }

    #[tokio::test]
    async fn media_toggles_are_reported() {
        let conference = LoopbackConference::new();
        conference.join("test", &token(), "Ada").await.unwrap();
        let mut rx = conference.events();

        conference.mute_local_audio().await.unwrap();
        conference.start_local_video().await.unwrap();
        conference.simulate_peer_video(7, VideoAction::Start).unwrap();

        assert!(conference.is_audio_muted());
        assert!(conference.is_video_capturing());
        assert_eq!(
            drain(&mut rx),
            vec![
                ConferenceEvent::LocalAudioChanged { muted: true },
                ConferenceEvent::LocalVideoChanged { capturing: true },
                ConferenceEvent::PeerVideoChanged {
                    user_id: 7,
                    action: VideoAction::Start
                },
            ]
        );
    }

    #[tokio::test]
    async fn network_drop_flaps_through_reconnecting() {
        let conference = LoopbackConference::new();
        conference.join("test", &token(), "Ada").await.unwrap();
        let mut rx = conference.events();

        conference.simulate_network_drop().unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                ConferenceEvent::ConnectionChanged(ConferenceConnectionState::Reconnecting),
                ConferenceEvent::ConnectionChanged(ConferenceConnectionState::Connected),
            ]
        );
    }
}
