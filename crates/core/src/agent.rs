//! Contract for the conversational agent session.
//!
//! The orchestrator never looks inside agent reasoning. It hands the adapter a
//! credential and a definition, sends opaque control events, and reacts to the
//! adapter's own connection-status reports.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

#[cfg(test)]
use mockall::automock;

use crate::credential::EphemeralKey;
use crate::guardrail::OutputGuardrail;
use crate::session_state::SessionStatus;
use crate::sink::AudioSink;
use crate::transcript::ExtraContext;
use crate::types::ClientEvent;
use crate::types::audio::Voice;

const DEFAULT_AGENT_INSTRUCTIONS: &str = "\
You are a helpful customer service agent joining a video call. Keep the \
conversation natural and help the caller resolve their question correctly.

## Tone
- Neutral and to the point.
- Quick and concise; no sing-song phrasing.

## Small talk
- Handle greetings and thanks briefly.
- Repeat or clarify when asked.

## Filler phrases
- \"One moment.\"
- \"Let me check.\"
";

/// Name, voice and system instructions the agent session starts with.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub voice: Voice,
    pub instructions: String,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, voice: Voice, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            voice,
            instructions: instructions.into(),
        }
    }
}

impl Default for AgentDefinition {
    fn default() -> Self {
        Self::new("chatAgent", Voice::Sage, DEFAULT_AGENT_INSTRUCTIONS)
    }
}

/// A connection-state change reported by the agent adapter.
///
/// `attempt` is the one the session was opened for, so reports from a session
/// that has since been torn down can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentStatusReport {
    pub attempt: u64,
    pub status: SessionStatus,
}

/// Everything an agent session needs to open.
#[derive(Clone)]
pub struct AgentConnectConfig {
    /// Connect attempt this session belongs to; echoed in every [`AgentStatusReport`].
    pub attempt: u64,
    pub key: EphemeralKey,
    pub agent: AgentDefinition,
    pub audio_sink: Arc<dyn AudioSink>,
    /// Filters evaluated against agent output before it is played.
    pub output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    pub extra_context: ExtraContext,
}

impl std::fmt::Debug for AgentConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnectConfig")
            .field("attempt", &self.attempt)
            .field("key", &self.key)
            .field("agent", &self.agent.name)
            .field("output_guardrails", &self.output_guardrails.len())
            .finish_non_exhaustive()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Starts connecting. Returning `Ok` does not mean connected: the adapter
    /// reports `Connected` through [`AgentSession::status_events`] once its own
    /// negotiation completes.
    async fn connect(&self, config: AgentConnectConfig) -> Result<()>;

    /// Tears the session down, including one still being opened: a connect
    /// that completes afterwards must close what it opened and fail. Safe to
    /// call when nothing is open.
    async fn disconnect(&self) -> Result<()>;

    async fn send_event(&self, event: ClientEvent) -> Result<()>;

    async fn send_user_text(&self, text: &str) -> Result<()>;

    /// Cancels in-flight agent output and drops queued playback. Not an error when idle.
    async fn interrupt(&self) -> Result<()>;

    /// Mutes or unmutes the session's outbound audio.
    async fn mute(&self, muted: bool) -> Result<()>;

    fn status_events(&self) -> broadcast::Receiver<AgentStatusReport>;
}
