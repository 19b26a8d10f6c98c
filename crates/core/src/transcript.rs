//! In-memory event log and breadcrumbs for one session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde_json::Value;

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Breadcrumb,
    ClientEvent,
    ServerEvent,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub at: DateTime<Local>,
    pub kind: EntryKind,
    pub title: String,
    pub data: Option<Value>,
}

/// Bounded, shareable log. Oldest entries are evicted first.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<VecDeque<TranscriptEntry>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_breadcrumb(&self, title: impl Into<String>, data: Option<Value>) {
        self.push(EntryKind::Breadcrumb, title.into(), data);
    }

    /// Records an outgoing event under `label`, or under its own `type` when the label is empty.
    pub fn log_client_event(&self, event: Value, label: &str) {
        let kind = event_type(&event);
        let title = if label.is_empty() {
            kind
        } else {
            format!("{} {}", kind, label)
        };
        self.push(EntryKind::ClientEvent, title, Some(event));
    }

    pub fn log_server_event(&self, event: Value) {
        let title = event_type(&event);
        self.push(EntryKind::ServerEvent, title, Some(event));
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn titles(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.title).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, kind: EntryKind, title: String, data: Option<Value>) {
        tracing::trace!(?kind, %title, "transcript entry");
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() == MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(TranscriptEntry {
            at: Local::now(),
            kind,
            title,
            data,
        });
    }
}

fn event_type(event: &Value) -> String {
    event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Cross-cutting context handed to the agent adapter on connect.
#[derive(Debug, Clone, Default)]
pub struct ExtraContext {
    pub transcript: Transcript,
}

impl ExtraContext {
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }

    pub fn add_transcript_breadcrumb(&self, title: impl Into<String>, data: Option<Value>) {
        self.transcript.add_breadcrumb(title, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_are_titled_by_type_and_label() {
        let transcript = Transcript::new();
        transcript.log_client_event(json!({"type": "input_audio_buffer.commit"}), "commit PTT");
        transcript.log_client_event(json!({"type": "response.create"}), "");

        assert_eq!(
            transcript.titles(),
            vec!["input_audio_buffer.commit commit PTT", "response.create"]
        );
    }

    #[test]
    fn clones_share_one_log() {
        let transcript = Transcript::new();
        let context = ExtraContext::new(transcript.clone());
        context.add_transcript_breadcrumb("Output Guardrail Tripped", None);

        let entries = transcript.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Breadcrumb);
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let transcript = Transcript::new();
        for i in 0..MAX_ENTRIES + 5 {
            transcript.add_breadcrumb(format!("crumb {}", i), None);
        }

        assert_eq!(transcript.len(), MAX_ENTRIES);
        assert_eq!(transcript.titles()[0], "crumb 5");
    }
}
