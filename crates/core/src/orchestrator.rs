//! Runs the session reducer against live adapters.
//!
//! One task owns the [`SessionState`]. Adapter notifications, user intent and
//! async resolutions all arrive on a single bus and are applied strictly in
//! order; the resulting [`Command`]s are executed before the next message is
//! taken. Credential fetch and agent connect are the only effects that run in
//! their own task, and they report back tagged with their attempt id.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::Command;
use crate::agent::{AgentConnectConfig, AgentDefinition, AgentSession, AgentStatusReport};
use crate::conference::{ConferenceEvent, ConferenceSession};
use crate::credential::{CredentialProvider, EphemeralKey};
use crate::error::{CredentialError, SessionError};
use crate::guardrail::OutputGuardrail;
use crate::session_state::{Action, SessionSnapshot, SessionState, SessionStatus};
use crate::sink::{AudioSink, apply_playback};
use crate::transcript::ExtraContext;
use crate::turn::{TurnMode, VadPolicy};

pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub vad: VadPolicy,
    pub push_to_talk: bool,
    pub playback_enabled: bool,
    /// Upper bound on a credential fetch. `None` waits indefinitely.
    pub credential_timeout: Option<Duration>,
    pub bus_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            vad: VadPolicy::default(),
            push_to_talk: true,
            playback_enabled: true,
            credential_timeout: None,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

/// What the agent session is opened with on every connect.
#[derive(Clone, Default)]
pub struct AgentProfile {
    pub definition: AgentDefinition,
    pub guardrails: Vec<Arc<dyn OutputGuardrail>>,
    pub extra_context: ExtraContext,
}

/// The adapters the orchestrator drives.
#[derive(Clone)]
pub struct Adapters {
    pub agent: Arc<dyn AgentSession>,
    pub conference: Arc<dyn ConferenceSession>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub sink: Arc<dyn AudioSink>,
}

enum BusMessage {
    Action(Action),
    Sync(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

pub struct Orchestrator {
    state: SessionState,
    config: OrchestratorConfig,
    adapters: Adapters,
    profile: AgentProfile,
    bus_tx: mpsc::Sender<BusMessage>,
    bus_rx: mpsc::Receiver<BusMessage>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    conference_events: broadcast::Receiver<ConferenceEvent>,
    agent_status: broadcast::Receiver<AgentStatusReport>,
}

impl Orchestrator {
    /// Creates the orchestrator and a handle for driving it.
    ///
    /// Adapter subscriptions are taken here, so events published before
    /// [`Orchestrator::run`] starts are not lost.
    pub fn new(
        config: OrchestratorConfig,
        adapters: Adapters,
        profile: AgentProfile,
    ) -> (Self, OrchestratorHandle) {
        let state = SessionState::new(
            TurnMode::from_push_to_talk(config.push_to_talk),
            config.playback_enabled,
            config.vad.clone(),
        );
        let (bus_tx, bus_rx) = mpsc::channel(config.bus_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let conference_events = adapters.conference.events();
        let agent_status = adapters.agent.status_events();

        let handle = OrchestratorHandle {
            bus: bus_tx.clone(),
            snapshot: snapshot_rx,
        };
        let orchestrator = Self {
            state,
            config,
            adapters,
            profile,
            bus_tx,
            bus_rx,
            snapshot_tx,
            conference_events,
            agent_status,
        };
        (orchestrator, handle)
    }

    pub async fn run(mut self) {
        let forwarders = [
            spawn_conference_forwarder(self.conference_events.resubscribe(), self.bus_tx.clone()),
            spawn_agent_forwarder(self.agent_status.resubscribe(), self.bus_tx.clone()),
        ];

        // Apply the initial playback flag to the local sink.
        self.execute(Command::ApplyPlayback {
            enabled: self.config.playback_enabled,
            sync_remote: false,
        })
        .await;

        while let Some(message) = self.bus_rx.recv().await {
            match message {
                BusMessage::Action(action) => self.apply(action).await,
                BusMessage::Sync(reply) => {
                    let _ = reply.send(self.state.snapshot());
                }
                BusMessage::Shutdown => {
                    tracing::info!("orchestrator shutting down");
                    self.apply(Action::Disconnect).await;
                    break;
                }
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
    }

    async fn apply(&mut self, action: Action) {
        if let Action::CredentialResolved { result, .. } = &action {
            self.record_credential_result(result);
        }
        let before = self.state.status();
        let commands = self.state.reduce(action);
        let snapshot = self.state.snapshot();
        if snapshot.status != before {
            tracing::info!("session status {} -> {}", before, snapshot.status);
        }
        self.snapshot_tx.send_replace(snapshot);

        for command in commands {
            self.execute(command).await;
        }
    }

    async fn execute(&self, command: Command) {
        let name = command.name();
        tracing::debug!(command = %name, "executing");
        let result = match command {
            Command::FetchCredential { attempt } => {
                self.spawn_credential_fetch(attempt);
                Ok(())
            }
            Command::ConnectAgent { attempt, key } => {
                self.spawn_agent_connect(attempt, key);
                Ok(())
            }
            Command::DisconnectAgent => self.adapters.agent.disconnect().await,
            Command::MuteConferenceMic => self.adapters.conference.mute_local_audio().await,
            Command::UnmuteConferenceMic => self.adapters.conference.unmute_local_audio().await,
            Command::InterruptAgent => self.adapters.agent.interrupt().await,
            Command::SendEvent { event, label } => {
                if let Ok(json) = serde_json::to_value(&event) {
                    self.transcript().log_client_event(json, label);
                }
                self.adapters.agent.send_event(event).await
            }
            Command::SendUserText(text) => self.adapters.agent.send_user_text(&text).await,
            Command::ApplyPlayback {
                enabled,
                sync_remote,
            } => {
                let local = apply_playback(self.adapters.sink.as_ref(), enabled);
                if sync_remote {
                    let remote = self.adapters.agent.mute(!enabled).await;
                    local.and(remote)
                } else {
                    local
                }
            }
        };
        // Best effort: a failed side effect never changes session status.
        if let Err(e) = result {
            tracing::warn!("{}", SessionError::side_effect(name, &e));
        }
    }

    fn spawn_credential_fetch(&self, attempt: u64) {
        let credentials = self.adapters.credentials.clone();
        let bus = self.bus_tx.clone();
        let timeout = self.config.credential_timeout;
        self.transcript()
            .add_breadcrumb("fetch_session_token_request", None);

        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, credentials.agent_key())
                    .await
                    .unwrap_or(Err(CredentialError::Timeout(limit))),
                None => credentials.agent_key().await,
            };
            let action = Action::CredentialResolved { attempt, result };
            if bus.send(BusMessage::Action(action)).await.is_err() {
                tracing::debug!("orchestrator gone before credential resolved");
            }
        });
    }

    fn spawn_agent_connect(&self, attempt: u64, key: EphemeralKey) {
        let agent = self.adapters.agent.clone();
        let bus = self.bus_tx.clone();
        let config = AgentConnectConfig {
            attempt,
            key,
            agent: self.profile.definition.clone(),
            audio_sink: self.adapters.sink.clone(),
            output_guardrails: self.profile.guardrails.clone(),
            extra_context: self.profile.extra_context.clone(),
        };
        tracing::info!(agent = %config.agent.name, attempt, "connecting agent session");

        tokio::spawn(async move {
            let result = agent.connect(config).await.map_err(|e| format!("{:#}", e));
            let action = Action::AgentConnectResolved { attempt, result };
            if bus.send(BusMessage::Action(action)).await.is_err() {
                tracing::debug!("orchestrator gone before agent connect resolved");
            }
        });
    }

    fn record_credential_result(&self, result: &Result<EphemeralKey, CredentialError>) {
        let transcript = self.transcript();
        match result {
            Ok(_) => transcript.add_breadcrumb("fetch_session_token_response", None),
            Err(CredentialError::Missing) => {
                transcript.add_breadcrumb("error.no_ephemeral_key", None);
            }
            Err(e) => transcript.add_breadcrumb(
                "fetch_session_token_response",
                Some(serde_json::json!({ "error": e.to_string() })),
            ),
        }
    }

    fn transcript(&self) -> &crate::transcript::Transcript {
        &self.profile.extra_context.transcript
    }
}

fn spawn_conference_forwarder(
    mut events: broadcast::Receiver<ConferenceEvent>,
    bus: mpsc::Sender<BusMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("conference event stream lagged by {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                ConferenceEvent::ConnectionChanged(state) => {
                    tracing::info!("conference connection changed: {}", state);
                    let action = Action::ConferenceStateChanged(state);
                    if bus.send(BusMessage::Action(action)).await.is_err() {
                        break;
                    }
                }
                ConferenceEvent::LocalAudioChanged { muted } => {
                    tracing::debug!(muted, "local conference audio changed");
                }
                ConferenceEvent::LocalVideoChanged { capturing } => {
                    tracing::debug!(capturing, "local conference video changed");
                }
                ConferenceEvent::PeerVideoChanged { user_id, action } => {
                    tracing::info!(user_id, ?action, "peer video changed");
                }
            }
        }
    })
}

fn spawn_agent_forwarder(
    mut status: broadcast::Receiver<AgentStatusReport>,
    bus: mpsc::Sender<BusMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let report = match status.recv().await {
                Ok(reported) => reported,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("agent status stream lagged by {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            tracing::debug!(attempt = report.attempt, "agent reported {}", report.status);
            let action = Action::AgentStatusChanged(report);
            if bus.send(BusMessage::Action(action)).await.is_err() {
                break;
            }
        }
    })
}

/// Cloneable front door to a running [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    bus: mpsc::Sender<BusMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl OrchestratorHandle {
    async fn dispatch(&self, action: Action) -> Result<()> {
        self.bus
            .send(BusMessage::Action(action))
            .await
            .map_err(|_| anyhow!("orchestrator is not running"))
    }

    pub async fn connect(&self) -> Result<()> {
        self.dispatch(Action::Connect).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.dispatch(Action::Disconnect).await
    }

    pub async fn talk_button_down(&self) -> Result<()> {
        self.dispatch(Action::TalkButtonDown).await
    }

    pub async fn talk_button_up(&self) -> Result<()> {
        self.dispatch(Action::TalkButtonUp).await
    }

    pub async fn set_push_to_talk(&self, active: bool) -> Result<()> {
        self.dispatch(Action::SetPushToTalk(active)).await
    }

    pub async fn set_playback_enabled(&self, enabled: bool) -> Result<()> {
        self.dispatch(Action::SetPlaybackEnabled(enabled)).await
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.dispatch(Action::Interrupt).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.dispatch(Action::SendText(text.into())).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot().status
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Resolves once every message sent before it has been applied.
    pub async fn sync(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.bus
            .send(BusMessage::Sync(tx))
            .await
            .map_err(|_| anyhow!("orchestrator is not running"))?;
        Ok(rx.await?)
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(predicate).await?;
        Ok(*snapshot)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.bus
            .send(BusMessage::Shutdown)
            .await
            .map_err(|_| anyhow!("orchestrator is not running"))
    }
}
