//! Server events consumed by the agent adapter.
//!
//! Several server events share a payload shape, so they share a struct here;
//! the variant in [`crate::ServerEvent`] carries the discriminator.

mod error;

pub use error::ErrorDetails;

use crate::session::Session;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    event_id: String,
    error: ErrorDetails,
}

impl ErrorEvent {
    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// Payload of `session.created` and `session.updated`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionEvent {
    event_id: String,
    session: Session,
}

impl SessionEvent {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// Payload of the `input_audio_buffer.*` notices.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferEvent {
    event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item_id: Option<String>,
    /// Set on `speech_started`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_start_ms: Option<u32>,
    /// Set on `speech_stopped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_end_ms: Option<u32>,
}

impl InputAudioBufferEvent {
    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    pub fn audio_start_ms(&self) -> Option<u32> {
        self.audio_start_ms
    }
}

/// `conversation.item.input_audio_transcription.completed`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscriptionEvent {
    event_id: String,
    item_id: String,
    transcript: String,
}

impl InputAudioTranscriptionEvent {
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseResource {
    id: String,
    /// `in_progress`, `completed`, `cancelled`, `failed` or `incomplete`.
    #[serde(default)]
    status: Option<String>,
}

impl ResponseResource {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

/// Payload of `response.created` and `response.done`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseEvent {
    event_id: String,
    response: ResponseResource,
}

impl ResponseEvent {
    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// Streamed chunk of a response: text, audio transcript or base64 PCM16 audio.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseDeltaEvent {
    event_id: String,
    response_id: String,
    item_id: String,
    #[serde(default)]
    output_index: u32,
    #[serde(default)]
    content_index: u32,
    delta: String,
}

impl ResponseDeltaEvent {
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }
}

/// End of a streamed part. `text` and `transcript` are set for the matching
/// `response.text.done` and `response.audio_transcript.done`; `response.audio.done` carries neither.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponsePartDoneEvent {
    event_id: String,
    response_id: String,
    item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transcript: Option<String>,
}

impl ResponsePartDoneEvent {
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    /// Final text of the part, whichever field the server filled.
    pub fn text(&self) -> &str {
        self.text
            .as_deref()
            .or(self.transcript.as_deref())
            .unwrap_or_default()
    }
}
