//! The session reducer.
//!
//! All orchestration state lives in one [`SessionState`] value and every
//! mutation goes through [`SessionState::reduce`], which returns the side
//! effects to run as [`Command`]s. Nothing in here performs I/O.

use std::fmt;

use crate::Command;
use crate::agent::AgentStatusReport;
use crate::conference::ConferenceConnectionState;
use crate::credential::EphemeralKey;
use crate::error::{CredentialError, SessionError};
use crate::turn::{TurnMode, VadPolicy, session_update_for};
use crate::types::ClientEvent;

pub const LABEL_CLEAR_PTT: &str = "clear PTT buffer";
pub const LABEL_COMMIT_PTT: &str = "commit PTT";
pub const LABEL_TRIGGER_RESPONSE_PTT: &str = "trigger response PTT";
pub const LABEL_TURN_MODE: &str = "turn mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "DISCONNECTED",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Connected => "CONNECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MicrophoneIntent {
    #[default]
    Idle,
    UserSpeaking,
}

/// Inputs to the reducer: user intent, adapter notifications and async resolutions.
#[derive(Debug)]
pub enum Action {
    Connect,
    Disconnect,
    ConferenceStateChanged(ConferenceConnectionState),
    CredentialResolved {
        attempt: u64,
        result: Result<EphemeralKey, CredentialError>,
    },
    AgentConnectResolved {
        attempt: u64,
        result: Result<(), String>,
    },
    AgentStatusChanged(AgentStatusReport),
    TalkButtonDown,
    TalkButtonUp,
    SetPushToTalk(bool),
    SetPlaybackEnabled(bool),
    Interrupt,
    SendText(String),
}

/// Read-only view published after every transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub attempt: u64,
    pub turn_mode: TurnMode,
    pub mic: MicrophoneIntent,
    pub playback_enabled: bool,
    pub conference: Option<ConferenceConnectionState>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    status: SessionStatus,
    /// Bumped on every connect and teardown; async resolutions carrying an
    /// older value are discarded.
    attempt: u64,
    turn_mode: TurnMode,
    mic: MicrophoneIntent,
    playback_enabled: bool,
    conference: Option<ConferenceConnectionState>,
    vad: VadPolicy,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(TurnMode::PushToTalk, true, VadPolicy::default())
    }
}

impl SessionState {
    pub fn new(turn_mode: TurnMode, playback_enabled: bool, vad: VadPolicy) -> Self {
        Self {
            status: SessionStatus::Disconnected,
            attempt: 0,
            turn_mode,
            mic: MicrophoneIntent::Idle,
            playback_enabled,
            conference: None,
            vad,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            attempt: self.attempt,
            turn_mode: self.turn_mode,
            mic: self.mic,
            playback_enabled: self.playback_enabled,
            conference: self.conference,
        }
    }

    /// Applies `action` and returns the side effects to run, in order.
    pub fn reduce(&mut self, action: Action) -> Vec<Command> {
        let mut commands = Vec::new();
        match action {
            Action::Connect => self.connect(&mut commands),
            Action::Disconnect => self.disconnect(&mut commands),
            Action::ConferenceStateChanged(state) => {
                self.conference = Some(state);
                match state {
                    ConferenceConnectionState::Connected
                        if self.status == SessionStatus::Disconnected =>
                    {
                        self.connect(&mut commands)
                    }
                    ConferenceConnectionState::Closed => self.disconnect(&mut commands),
                    _ => {}
                }
            }
            Action::CredentialResolved { attempt, result } => {
                if let Err(e) = self.check_pending(attempt) {
                    tracing::debug!("{}", e);
                    return commands;
                }
                match result {
                    Ok(key) => commands.push(Command::ConnectAgent { attempt, key }),
                    Err(e) => {
                        tracing::error!("{}", SessionError::from(e));
                        self.reset(&mut commands);
                    }
                }
            }
            Action::AgentConnectResolved { attempt, result } => {
                if attempt != self.attempt {
                    tracing::debug!(
                        "{}",
                        SessionError::Stale {
                            attempt,
                            current: self.attempt
                        }
                    );
                    return commands;
                }
                if let Err(reason) = result {
                    tracing::error!("{}", SessionError::Connect(reason));
                    if self.status == SessionStatus::Connected {
                        commands.push(Command::DisconnectAgent);
                    }
                    self.reset(&mut commands);
                }
            }
            Action::AgentStatusChanged(reported) => {
                self.agent_status_changed(reported, &mut commands)
            }
            Action::TalkButtonDown => {
                if self.status != SessionStatus::Connected || self.mic != MicrophoneIntent::Idle {
                    return commands;
                }
                commands.push(Command::MuteConferenceMic);
                commands.push(Command::InterruptAgent);
                self.mic = MicrophoneIntent::UserSpeaking;
                commands.push(Command::SendEvent {
                    event: ClientEvent::clear_input_audio_buffer(),
                    label: LABEL_CLEAR_PTT,
                });
            }
            Action::TalkButtonUp => {
                if self.status != SessionStatus::Connected
                    || self.mic != MicrophoneIntent::UserSpeaking
                {
                    return commands;
                }
                commands.push(Command::UnmuteConferenceMic);
                self.mic = MicrophoneIntent::Idle;
                commands.push(Command::SendEvent {
                    event: ClientEvent::commit_input_audio_buffer(),
                    label: LABEL_COMMIT_PTT,
                });
                commands.push(Command::SendEvent {
                    event: ClientEvent::create_response(),
                    label: LABEL_TRIGGER_RESPONSE_PTT,
                });
            }
            Action::SetPushToTalk(active) => {
                let mode = TurnMode::from_push_to_talk(active);
                if mode == self.turn_mode {
                    return commands;
                }
                self.turn_mode = mode;
                if self.status == SessionStatus::Connected {
                    commands.push(self.session_update());
                }
            }
            Action::SetPlaybackEnabled(enabled) => {
                self.playback_enabled = enabled;
                commands.push(Command::ApplyPlayback {
                    enabled,
                    sync_remote: self.status == SessionStatus::Connected,
                });
            }
            Action::Interrupt => {
                if self.status == SessionStatus::Connected {
                    commands.push(Command::InterruptAgent);
                }
            }
            Action::SendText(text) => {
                let text = text.trim();
                if text.is_empty() || self.status != SessionStatus::Connected {
                    return commands;
                }
                commands.push(Command::InterruptAgent);
                commands.push(Command::SendUserText(text.to_string()));
            }
        }
        commands
    }

    fn connect(&mut self, commands: &mut Vec<Command>) {
        if self.status != SessionStatus::Disconnected {
            return;
        }
        self.status = SessionStatus::Connecting;
        self.attempt += 1;
        commands.push(Command::FetchCredential {
            attempt: self.attempt,
        });
    }

    fn disconnect(&mut self, commands: &mut Vec<Command>) {
        commands.push(Command::DisconnectAgent);
        self.reset(commands);
    }

    /// Back to `Disconnected`, restoring the conference mic if the user was mid-press.
    fn reset(&mut self, commands: &mut Vec<Command>) {
        if self.mic == MicrophoneIntent::UserSpeaking
            && self.conference != Some(ConferenceConnectionState::Closed)
        {
            commands.push(Command::UnmuteConferenceMic);
        }
        self.status = SessionStatus::Disconnected;
        self.mic = MicrophoneIntent::Idle;
        self.attempt += 1;
    }

    fn agent_status_changed(&mut self, report: AgentStatusReport, commands: &mut Vec<Command>) {
        if report.attempt != self.attempt {
            // A session from an earlier attempt. Only tear it down when no
            // newer session exists that a disconnect would hit instead.
            if report.status == SessionStatus::Connected
                && self.status == SessionStatus::Disconnected
            {
                tracing::warn!(
                    attempt = report.attempt,
                    "agent session connected after teardown, disconnecting it"
                );
                commands.push(Command::DisconnectAgent);
            } else {
                tracing::debug!(
                    "{}",
                    SessionError::Stale {
                        attempt: report.attempt,
                        current: self.attempt
                    }
                );
            }
            return;
        }
        match (self.status, report.status) {
            (SessionStatus::Connecting, SessionStatus::Connected) => {
                self.status = SessionStatus::Connected;
                commands.push(self.session_update());
                // Transport mute does not survive a reconnect.
                commands.push(Command::ApplyPlayback {
                    enabled: self.playback_enabled,
                    sync_remote: true,
                });
            }
            (SessionStatus::Connecting | SessionStatus::Connected, SessionStatus::Disconnected) => {
                tracing::info!("agent session dropped while {}", self.status);
                self.reset(commands);
            }
            _ => {}
        }
    }

    fn check_pending(&self, attempt: u64) -> Result<(), SessionError> {
        if attempt != self.attempt || self.status != SessionStatus::Connecting {
            return Err(SessionError::Stale {
                attempt,
                current: self.attempt,
            });
        }
        Ok(())
    }

    fn session_update(&self) -> Command {
        Command::SendEvent {
            event: session_update_for(self.turn_mode, &self.vad),
            label: LABEL_TURN_MODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(commands: &[Command]) -> Vec<String> {
        commands.iter().map(Command::name).collect()
    }

    /// The agent reporting `status` for the attempt currently in flight.
    fn agent(state: &SessionState, status: SessionStatus) -> Action {
        Action::AgentStatusChanged(AgentStatusReport {
            attempt: state.attempt(),
            status,
        })
    }

    fn connected(turn_mode: TurnMode) -> SessionState {
        let mut state = SessionState::new(turn_mode, true, VadPolicy::default());
        state.reduce(Action::ConferenceStateChanged(
            ConferenceConnectionState::Connected,
        ));
        let attempt = state.attempt();
        state.reduce(Action::CredentialResolved {
            attempt,
            result: Ok(EphemeralKey::new("ek_test")),
        });
        state.reduce(agent(&state, SessionStatus::Connecting));
        state.reduce(agent(&state, SessionStatus::Connected));
        assert_eq!(state.status(), SessionStatus::Connected);
        state
    }

    fn turn_detection_of(command: &Command) -> serde_json::Value {
        match command {
            Command::SendEvent { event, .. } => {
                serde_json::to_value(event).unwrap()["session"]["turn_detection"].clone()
            }
            other => panic!("expected a session update, got {}", other.name()),
        }
    }

    #[test]
    fn conference_connected_fetches_a_credential_then_connects_the_agent() {
        let mut state = SessionState::default();

        let commands = state.reduce(Action::ConferenceStateChanged(
            ConferenceConnectionState::Connected,
        ));
        assert_eq!(names(&commands), vec!["fetch_credential"]);
        assert_eq!(state.status(), SessionStatus::Connecting);

        let commands = state.reduce(Action::CredentialResolved {
            attempt: state.attempt(),
            result: Ok(EphemeralKey::new("ek_1")),
        });
        match commands.as_slice() {
            [Command::ConnectAgent { key, .. }] => assert_eq!(key.expose(), "ek_1"),
            other => panic!("unexpected commands: {:?}", names(other)),
        }
        // Connected only when the adapter says so.
        assert_eq!(state.status(), SessionStatus::Connecting);
    }

    #[test]
    fn missing_credential_reverts_without_connecting() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);

        let commands = state.reduce(Action::CredentialResolved {
            attempt: state.attempt(),
            result: Err(CredentialError::Missing),
        });
        assert!(commands.is_empty());
        assert_eq!(state.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn connect_is_guarded_while_connecting() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);
        let attempt = state.attempt();

        assert!(state.reduce(Action::Connect).is_empty());
        assert!(
            state
                .reduce(Action::ConferenceStateChanged(
                    ConferenceConnectionState::Connected
                ))
                .is_empty()
        );
        assert_eq!(state.attempt(), attempt);
    }

    #[test]
    fn reconnect_flapping_does_not_start_a_second_agent() {
        let mut state = connected(TurnMode::PushToTalk);
        for conference in [
            ConferenceConnectionState::Reconnecting,
            ConferenceConnectionState::Connected,
        ] {
            assert!(state.reduce(Action::ConferenceStateChanged(conference)).is_empty());
        }
        assert_eq!(state.status(), SessionStatus::Connected);
    }

    #[test]
    fn conference_closed_disconnects_once() {
        let mut state = connected(TurnMode::PushToTalk);
        state.reduce(Action::TalkButtonDown);

        let commands = state.reduce(Action::ConferenceStateChanged(
            ConferenceConnectionState::Closed,
        ));
        // Conference is gone, so no mic restore.
        assert_eq!(names(&commands), vec!["disconnect_agent"]);
        assert_eq!(state.status(), SessionStatus::Disconnected);
        assert_eq!(state.snapshot().mic, MicrophoneIntent::Idle);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut state = connected(TurnMode::PushToTalk);
        state.reduce(Action::Disconnect);
        let first = state.snapshot();

        let commands = state.reduce(Action::Disconnect);
        assert_eq!(names(&commands), vec!["disconnect_agent"]);
        assert_eq!(state.status(), first.status);
        assert_eq!(state.snapshot().mic, first.mic);
    }

    #[test]
    fn disconnect_mid_press_restores_the_conference_mic() {
        let mut state = connected(TurnMode::PushToTalk);
        state.reduce(Action::TalkButtonDown);

        let commands = state.reduce(Action::Disconnect);
        assert_eq!(
            names(&commands),
            vec!["disconnect_agent", "unmute_conference_mic"]
        );
    }

    #[test]
    fn late_credential_after_disconnect_is_discarded() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);
        let stale = state.attempt();
        state.reduce(Action::Disconnect);

        let commands = state.reduce(Action::CredentialResolved {
            attempt: stale,
            result: Ok(EphemeralKey::new("ek_late")),
        });
        assert!(commands.is_empty());
        assert_eq!(state.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn credential_from_an_earlier_attempt_is_discarded() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);
        let first = state.attempt();
        state.reduce(Action::Disconnect);
        state.reduce(Action::Connect);

        let commands = state.reduce(Action::CredentialResolved {
            attempt: first,
            result: Ok(EphemeralKey::new("ek_old")),
        });
        assert!(commands.is_empty());
        assert_eq!(state.status(), SessionStatus::Connecting);
    }

    #[test]
    fn connect_failure_reverts_to_disconnected() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);
        let attempt = state.attempt();
        state.reduce(Action::CredentialResolved {
            attempt,
            result: Ok(EphemeralKey::new("ek")),
        });

        let commands = state.reduce(Action::AgentConnectResolved {
            attempt,
            result: Err("401 unauthorized".to_string()),
        });
        assert!(commands.is_empty());
        assert_eq!(state.status(), SessionStatus::Disconnected);
    }

    fn report(attempt: u64, status: SessionStatus) -> Action {
        Action::AgentStatusChanged(AgentStatusReport { attempt, status })
    }

    #[test]
    fn agent_connected_after_teardown_is_disconnected() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);
        let torn_down = state.attempt();
        state.reduce(Action::Disconnect);

        let commands = state.reduce(report(torn_down, SessionStatus::Connected));
        assert_eq!(names(&commands), vec!["disconnect_agent"]);
        assert_eq!(state.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn previous_session_disconnect_report_does_not_cancel_a_new_attempt() {
        let mut state = connected(TurnMode::PushToTalk);
        let previous = state.attempt();
        state.reduce(Action::Disconnect);
        state.reduce(Action::Connect);
        state.reduce(agent(&state, SessionStatus::Connecting));

        assert!(
            state
                .reduce(report(previous, SessionStatus::Disconnected))
                .is_empty()
        );
        assert_eq!(state.status(), SessionStatus::Connecting);
    }

    #[test]
    fn late_session_is_not_adopted_by_a_newer_attempt() {
        let mut state = SessionState::default();
        state.reduce(Action::ConferenceStateChanged(
            ConferenceConnectionState::Connected,
        ));
        let first = state.attempt();
        state.reduce(Action::CredentialResolved {
            attempt: first,
            result: Ok(EphemeralKey::new("ek_first")),
        });
        state.reduce(report(first, SessionStatus::Connecting));

        // Conference flaps while the first agent socket is still opening.
        state.reduce(Action::ConferenceStateChanged(
            ConferenceConnectionState::Closed,
        ));
        state.reduce(Action::ConferenceStateChanged(
            ConferenceConnectionState::Connected,
        ));
        let current = state.attempt();
        assert!(current > first);

        // Would hit the new session, so the late one is left to close itself.
        assert!(state.reduce(report(first, SessionStatus::Connected)).is_empty());
        assert_eq!(state.status(), SessionStatus::Connecting);

        let commands = state.reduce(Action::CredentialResolved {
            attempt: current,
            result: Ok(EphemeralKey::new("ek_current")),
        });
        match commands.as_slice() {
            [Command::ConnectAgent { attempt, key }] => {
                assert_eq!(*attempt, current);
                assert_eq!(key.expose(), "ek_current");
            }
            other => panic!("unexpected commands: {:?}", names(other)),
        }

        state.reduce(report(current, SessionStatus::Connected));
        assert_eq!(state.status(), SessionStatus::Connected);
        assert_eq!(state.attempt(), current);
    }

    #[test]
    fn agent_drop_while_negotiating_reverts() {
        let mut state = SessionState::default();
        state.reduce(Action::Connect);
        state.reduce(agent(&state, SessionStatus::Connecting));

        state.reduce(agent(&state, SessionStatus::Disconnected));
        assert_eq!(state.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn connected_sends_mode_then_resyncs_playback() {
        let mut state = SessionState::new(TurnMode::PushToTalk, false, VadPolicy::default());
        state.reduce(Action::Connect);
        state.reduce(agent(&state, SessionStatus::Connecting));

        let commands = state.reduce(agent(&state, SessionStatus::Connected));
        assert_eq!(
            names(&commands),
            vec!["send:session.update", "playback:false:true"]
        );
        assert!(turn_detection_of(&commands[0]).is_null());
        assert!(matches!(
            commands[0],
            Command::SendEvent {
                label: LABEL_TURN_MODE,
                ..
            }
        ));
    }

    #[test]
    fn press_and_release_are_no_ops_unless_connected() {
        for setup in [Action::Disconnect, Action::Connect] {
            let mut state = SessionState::default();
            state.reduce(setup);
            for action in [
                Action::TalkButtonDown,
                Action::TalkButtonUp,
                Action::TalkButtonDown,
                Action::TalkButtonDown,
                Action::TalkButtonUp,
            ] {
                assert!(state.reduce(action).is_empty());
            }
            assert_eq!(state.snapshot().mic, MicrophoneIntent::Idle);
        }
    }

    #[test]
    fn push_to_talk_cycle_orders_clear_commit_response() {
        let mut state = connected(TurnMode::PushToTalk);

        let press = state.reduce(Action::TalkButtonDown);
        assert_eq!(
            names(&press),
            vec![
                "mute_conference_mic",
                "interrupt_agent",
                "send:input_audio_buffer.clear"
            ]
        );
        assert_eq!(state.snapshot().mic, MicrophoneIntent::UserSpeaking);

        let release = state.reduce(Action::TalkButtonUp);
        assert_eq!(
            names(&release),
            vec![
                "unmute_conference_mic",
                "send:input_audio_buffer.commit",
                "send:response.create"
            ]
        );
        assert_eq!(state.snapshot().mic, MicrophoneIntent::Idle);

        let labels: Vec<&str> = press
            .iter()
            .chain(release.iter())
            .filter_map(|c| match c {
                Command::SendEvent { label, .. } => Some(*label),
                _ => None,
            })
            .collect();
        assert_eq!(
            labels,
            vec![LABEL_CLEAR_PTT, LABEL_COMMIT_PTT, LABEL_TRIGGER_RESPONSE_PTT]
        );
    }

    #[test]
    fn repeated_press_and_idle_release_are_no_ops() {
        let mut state = connected(TurnMode::PushToTalk);
        assert!(state.reduce(Action::TalkButtonUp).is_empty());

        state.reduce(Action::TalkButtonDown);
        assert!(state.reduce(Action::TalkButtonDown).is_empty());

        state.reduce(Action::TalkButtonUp);
        assert!(state.reduce(Action::TalkButtonUp).is_empty());
    }

    #[test]
    fn toggling_push_to_talk_emits_exactly_one_update() {
        let mut state = connected(TurnMode::PushToTalk);

        let off = state.reduce(Action::SetPushToTalk(false));
        assert_eq!(names(&off), vec!["send:session.update"]);
        assert_eq!(turn_detection_of(&off[0])["type"], "server_vad");
        assert!(state.reduce(Action::SetPushToTalk(false)).is_empty());

        let on = state.reduce(Action::SetPushToTalk(true));
        assert_eq!(names(&on), vec!["send:session.update"]);
        assert!(turn_detection_of(&on[0]).is_null());
    }

    #[test]
    fn push_to_talk_toggle_while_disconnected_is_applied_on_connect() {
        let mut state = SessionState::default();
        assert!(state.reduce(Action::SetPushToTalk(false)).is_empty());

        state.reduce(Action::Connect);
        state.reduce(agent(&state, SessionStatus::Connecting));
        let commands = state.reduce(agent(&state, SessionStatus::Connected));
        assert_eq!(turn_detection_of(&commands[0])["type"], "server_vad");
    }

    #[test]
    fn playback_toggle_syncs_remote_only_when_connected() {
        let mut state = SessionState::default();
        let commands = state.reduce(Action::SetPlaybackEnabled(false));
        assert_eq!(names(&commands), vec!["playback:false:false"]);

        let mut state = connected(TurnMode::PushToTalk);
        let commands = state.reduce(Action::SetPlaybackEnabled(false));
        assert_eq!(names(&commands), vec!["playback:false:true"]);
        assert!(!state.snapshot().playback_enabled);

        let again = state.reduce(Action::SetPlaybackEnabled(false));
        assert_eq!(names(&again), names(&commands));
        assert!(!state.snapshot().playback_enabled);
    }

    #[test]
    fn interrupt_only_when_connected() {
        let mut state = SessionState::default();
        assert!(state.reduce(Action::Interrupt).is_empty());

        let mut state = connected(TurnMode::ServerVoiceActivity);
        assert_eq!(
            names(&state.reduce(Action::Interrupt)),
            vec!["interrupt_agent"]
        );
    }

    #[test]
    fn send_text_trims_and_interrupts_first() {
        let mut state = connected(TurnMode::PushToTalk);
        assert!(state.reduce(Action::SendText("   ".to_string())).is_empty());

        let commands = state.reduce(Action::SendText("  hello there \n".to_string()));
        assert_eq!(names(&commands), vec!["interrupt_agent", "send_user_text"]);
        match &commands[1] {
            Command::SendUserText(text) => assert_eq!(text, "hello there"),
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[test]
    fn status_displays_as_upper_case() {
        assert_eq!(SessionStatus::Connecting.to_string(), "CONNECTING");
    }
}
