pub mod agent;
pub mod conference;
pub mod credential;
pub mod error;
pub mod guardrail;
pub mod orchestrator;
pub mod session_state;
pub mod sink;
pub mod transcript;
pub mod turn;

pub use duet_realtime_types as types;

use crate::credential::EphemeralKey;
use crate::types::ClientEvent;

/// Represents side effects the session reducer (`SessionState`) asks the runtime to perform.
///
/// The reducer only decides; the orchestrator executes.
#[derive(Debug)]
pub enum Command {
    /// Fetch a fresh ephemeral key for the given connect attempt.
    FetchCredential { attempt: u64 },
    /// Open the agent session with the key fetched for `attempt`.
    ConnectAgent { attempt: u64, key: EphemeralKey },
    DisconnectAgent,
    MuteConferenceMic,
    UnmuteConferenceMic,
    /// Cancel any agent output currently being produced or played.
    InterruptAgent,
    /// Send a control event to the agent session. `label` is the breadcrumb recorded with it.
    SendEvent {
        event: ClientEvent,
        label: &'static str,
    },
    SendUserText(String),
    /// Apply the playback flag to the local sink, and to the agent's outbound
    /// audio too when `sync_remote` is set.
    ApplyPlayback { enabled: bool, sync_remote: bool },
}

impl Command {
    /// Short stable name, used in logs and tests.
    pub fn name(&self) -> String {
        match self {
            Command::FetchCredential { .. } => "fetch_credential".to_string(),
            Command::ConnectAgent { .. } => "connect_agent".to_string(),
            Command::DisconnectAgent => "disconnect_agent".to_string(),
            Command::MuteConferenceMic => "mute_conference_mic".to_string(),
            Command::UnmuteConferenceMic => "unmute_conference_mic".to_string(),
            Command::InterruptAgent => "interrupt_agent".to_string(),
            Command::SendEvent { event, .. } => format!("send:{}", event.kind()),
            Command::SendUserText(_) => "send_user_text".to_string(),
            Command::ApplyPlayback { enabled, sync_remote } => {
                format!("playback:{}:{}", enabled, sync_remote)
            }
        }
    }
}
