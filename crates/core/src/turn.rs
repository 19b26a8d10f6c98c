//! Turn-taking policy: which of the two exclusive modes is active and the
//! `session.update` that puts the agent session into it.

use crate::types::audio::{ServerVadTurnDetection, TurnDetection};
use crate::types::{ClientEvent, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    /// The client opens and closes the agent's listening window explicitly.
    PushToTalk,
    /// The agent session's own speech-endpoint detector decides.
    ServerVoiceActivity,
}

impl TurnMode {
    pub fn from_push_to_talk(active: bool) -> Self {
        if active {
            TurnMode::PushToTalk
        } else {
            TurnMode::ServerVoiceActivity
        }
    }
}

/// Server voice-activity detection settings used whenever push-to-talk is off.
///
/// The defaults favour precision: a 0.9 activation bar keeps background
/// conference audio from opening a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct VadPolicy {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
}

impl Default for VadPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

impl VadPolicy {
    fn turn_detection(&self) -> TurnDetection {
        TurnDetection::ServerVad(
            ServerVadTurnDetection::default()
                .with_threshold(self.threshold)
                .with_prefix_padding_ms(self.prefix_padding_ms)
                .with_silence_duration_ms(self.silence_duration_ms)
                .with_create_response(self.create_response),
        )
    }
}

/// Builds the `session.update` selecting `mode`.
///
/// Push-to-talk sends `turn_detection: null`; the two modes are never active together.
pub fn session_update_for(mode: TurnMode, vad: &VadPolicy) -> ClientEvent {
    let session = match mode {
        TurnMode::PushToTalk => Session::new().with_turn_detection_disable(),
        TurnMode::ServerVoiceActivity => {
            Session::new().with_turn_detection_enable(vad.turn_detection())
        }
    };
    ClientEvent::session_update(session.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_detection_json(event: &ClientEvent) -> serde_json::Value {
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "session.update");
        json["session"]["turn_detection"].clone()
    }

    #[test]
    fn push_to_talk_disables_server_vad() {
        let event = session_update_for(TurnMode::PushToTalk, &VadPolicy::default());

        assert!(turn_detection_json(&event).is_null());
    }

    #[test]
    fn voice_activity_mode_uses_the_fixed_policy() {
        let event = session_update_for(TurnMode::ServerVoiceActivity, &VadPolicy::default());
        let detection = turn_detection_json(&event);

        assert_eq!(detection["type"], "server_vad");
        assert!((detection["threshold"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(detection["prefix_padding_ms"], 300);
        assert_eq!(detection["silence_duration_ms"], 500);
        assert_eq!(detection["create_response"], true);
    }

    #[test]
    fn configured_policy_overrides_defaults() {
        let vad = VadPolicy {
            threshold: 0.6,
            silence_duration_ms: 800,
            ..VadPolicy::default()
        };
        let detection = turn_detection_json(&session_update_for(TurnMode::ServerVoiceActivity, &vad));

        assert_eq!(detection["silence_duration_ms"], 800);
        assert!((detection["threshold"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    }
}
