/// Output voice of the agent. Unknown names round-trip through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
    #[serde(untagged)]
    Custom(String),
}

const BUILT_IN_VOICES: [Voice; 8] = [
    Voice::Alloy,
    Voice::Ash,
    Voice::Ballad,
    Voice::Coral,
    Voice::Echo,
    Voice::Sage,
    Voice::Shimmer,
    Voice::Verse,
];

impl Voice {
    pub fn as_str(&self) -> &str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Ash => "ash",
            Voice::Ballad => "ballad",
            Voice::Coral => "coral",
            Voice::Echo => "echo",
            Voice::Sage => "sage",
            Voice::Shimmer => "shimmer",
            Voice::Verse => "verse",
            Voice::Custom(name) => name,
        }
    }
}

impl From<&str> for Voice {
    fn from(name: &str) -> Self {
        BUILT_IN_VOICES
            .iter()
            .find(|voice| voice.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Voice::Custom(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AudioFormat {
    #[serde(rename = "pcm16")]
    Pcm16,
    #[serde(rename = "g711_ulaw")]
    Mulaw,
    #[serde(rename = "g711_alaw")]
    Alaw,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TranscriptionModel {
    #[serde(rename = "whisper-1")]
    Whisper,
    #[serde(untagged)]
    Custom(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voices_serialize_as_lowercase_names() {
        assert_eq!(serde_json::to_value(Voice::Sage).unwrap(), "sage");
        assert_eq!(
            serde_json::from_value::<Voice>("marin".into()).unwrap(),
            Voice::Custom("marin".to_string())
        );
        assert_eq!(Voice::from("coral"), Voice::Coral);
    }

    #[test]
    fn whisper_uses_its_model_id() {
        assert_eq!(
            serde_json::to_value(TranscriptionModel::Whisper).unwrap(),
            "whisper-1"
        );
    }
}
