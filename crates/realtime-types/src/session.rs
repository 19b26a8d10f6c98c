use crate::audio::{AudioFormat, InputAudioTranscription, TranscriptionModel, TurnDetection, Voice};
use serde::{Deserialize, Deserializer};

/// Session configuration as sent in `session.update` and echoed back in
/// `session.created` / `session.updated`.
///
/// Every field is optional so an update only touches what it names.
/// `turn_detection` is tri-state: absent leaves the server setting alone,
/// `Some(None)` serializes as `null` and disables voice-activity detection.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    /// The set of modalities the model can respond with. To disable audio, set this to ["text"].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<String>>,

    /// The default system instructions prepended to model calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,

    /// The voice the model uses to respond. Cannot be changed once the model has responded with audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_audio_format: Option<AudioFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_audio_format: Option<AudioFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    turn_detection: Option<Option<TurnDetection>>,
}

// A present-but-null field must stay distinguishable from an absent one.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl Session {
    pub fn new() -> SessionConfigurator {
        SessionConfigurator::new()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn modalities(&self) -> Option<&[String]> {
        self.modalities.as_deref()
    }

    /// `None` when the field was absent, `Some(None)` when it was `null`.
    pub fn turn_detection(&self) -> Option<Option<&TurnDetection>> {
        self.turn_detection.as_ref().map(Option::as_ref)
    }
}

pub struct SessionConfigurator {
    session: Session,
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self {
            session: Session::default(),
        }
    }

    pub fn with_modalities_disable_audio(mut self) -> Self {
        self.session.modalities = Some(vec!["text".to_string()]);
        self
    }

    pub fn with_modalities_enable_audio(mut self) -> Self {
        self.session.modalities = Some(vec!["text".to_string(), "audio".to_string()]);
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.session.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.session.voice = Some(voice);
        self
    }

    pub fn with_input_audio_format(mut self, format: AudioFormat) -> Self {
        self.session.input_audio_format = Some(format);
        self
    }

    pub fn with_output_audio_format(mut self, format: AudioFormat) -> Self {
        self.session.output_audio_format = Some(format);
        self
    }

    pub fn with_input_audio_transcription_enable(mut self, model: TranscriptionModel) -> Self {
        self.session.input_audio_transcription =
            Some(InputAudioTranscription::new(model));
        self
    }

    pub fn with_turn_detection_enable(mut self, turn_detection: TurnDetection) -> Self {
        self.session.turn_detection = Some(Some(turn_detection));
        self
    }

    /// Sends `turn_detection: null`, handing turn boundaries to the client.
    pub fn with_turn_detection_disable(mut self) -> Self {
        self.session.turn_detection = Some(None);
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ServerVadTurnDetection;

    #[test]
    fn disabled_turn_detection_serializes_as_explicit_null() {
        let session = Session::new().with_turn_detection_disable().build();
        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json, serde_json::json!({ "turn_detection": null }));
    }

    #[test]
    fn untouched_turn_detection_is_omitted() {
        let session = Session::new().with_instructions("be brief").build();
        let json = serde_json::to_value(&session).unwrap();

        assert!(json.get("turn_detection").is_none());
        assert_eq!(json["instructions"], "be brief");
    }

    #[test]
    fn server_vad_carries_every_policy_field() {
        let vad = ServerVadTurnDetection::default()
            .with_threshold(0.9)
            .with_prefix_padding_ms(300)
            .with_silence_duration_ms(500)
            .with_create_response(true);
        let session = Session::new()
            .with_turn_detection_enable(TurnDetection::ServerVad(vad))
            .build();
        let json = serde_json::to_value(&session).unwrap();

        let detection = &json["turn_detection"];
        assert_eq!(detection["type"], "server_vad");
        assert!((detection["threshold"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(detection["prefix_padding_ms"], 300);
        assert_eq!(detection["silence_duration_ms"], 500);
        assert_eq!(detection["create_response"], true);
    }

    #[test]
    fn null_turn_detection_from_server_is_not_absent() {
        let session: Session = serde_json::from_str(r#"{"turn_detection": null}"#).unwrap();
        assert_eq!(session.turn_detection(), Some(None));

        let session: Session = serde_json::from_str(r#"{"voice": "sage"}"#).unwrap();
        assert_eq!(session.turn_detection(), None);
        assert_eq!(session.voice(), Some(&Voice::Sage));
    }
}
