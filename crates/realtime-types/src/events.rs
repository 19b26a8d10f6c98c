pub mod client;
pub mod server;

use client::*;
use server::*;

/// Control events the client sends to the agent session.
///
/// The `type` field is the stable discriminator; [`ClientEvent::kind`] returns it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend(InputAudioBufferAppendEvent),
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit(InputAudioBufferCommitEvent),
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear(InputAudioBufferClearEvent),
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate(ConversationItemCreateEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
    #[serde(rename = "response.cancel")]
    ResponseCancel(ResponseCancelEvent),
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate(_) => "session.update",
            ClientEvent::InputAudioBufferAppend(_) => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit(_) => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear(_) => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate(_) => "conversation.item.create",
            ClientEvent::ResponseCreate(_) => "response.create",
            ClientEvent::ResponseCancel(_) => "response.cancel",
        }
    }

    pub fn session_update(session: crate::Session) -> Self {
        ClientEvent::SessionUpdate(SessionUpdateEvent::new(session))
    }

    pub fn clear_input_audio_buffer() -> Self {
        ClientEvent::InputAudioBufferClear(InputAudioBufferClearEvent::new())
    }

    pub fn commit_input_audio_buffer() -> Self {
        ClientEvent::InputAudioBufferCommit(InputAudioBufferCommitEvent::new())
    }

    pub fn create_response() -> Self {
        ClientEvent::ResponseCreate(ResponseCreateEvent::new())
    }

    pub fn cancel_response() -> Self {
        ClientEvent::ResponseCancel(ResponseCancelEvent::new())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Synthesized locally when the socket closes.
    #[serde(rename = "close")]
    Close { reason: Option<String> },
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionEvent),
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted(InputAudioBufferEvent),
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared(InputAudioBufferEvent),
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted(InputAudioBufferEvent),
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped(InputAudioBufferEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted(InputAudioTranscriptionEvent),
    #[serde(rename = "response.created")]
    ResponseCreated(ResponseEvent),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseEvent),
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta(ResponseDeltaEvent),
    #[serde(rename = "response.text.done")]
    ResponseTextDone(ResponsePartDoneEvent),
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta(ResponseDeltaEvent),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(ResponsePartDoneEvent),
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta(ResponseDeltaEvent),
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone(ResponsePartDoneEvent),
    /// Every other server event; the adapter only logs these.
    #[serde(other)]
    Unhandled,
}
