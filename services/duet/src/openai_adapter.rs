//! Agent session adapter backed by the realtime WebSocket client.
//!
//! Connecting opens the socket and sends the agent's instructions and voice;
//! `Connected` is reported only when the server answers with `session.created`.
//! Agent audio is decoded into the playback sink, and the running transcript
//! of each response is checked against the output guardrails.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use duet_core::agent::{AgentConnectConfig, AgentDefinition, AgentSession, AgentStatusReport};
use duet_core::credential::EphemeralKey;
use duet_core::guardrail::{GuardrailTrip, OutputGuardrail, TranscriptDebounce, run_guardrails};
use duet_core::session_state::SessionStatus;
use duet_core::sink::AudioSink;
use duet_core::transcript::ExtraContext;
use duet_native_utils::audio::decode_i16;
use duet_realtime::types::audio::TranscriptionModel;
use duet_realtime::types::{ClientEvent, Item, MessageItem, MessageRole, ServerEvent, Session};
use duet_realtime::{RealtimeClient, ServerRx};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const STATUS_CAPACITY: usize = 16;

/// Opens a realtime client authorized by an ephemeral key.
#[async_trait]
pub trait RealtimeConnector: Send + Sync + 'static {
    type Client: RealtimeClient + 'static;

    async fn open(&self, key: &EphemeralKey) -> Result<Self::Client>;
}

#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    base_url: Option<String>,
    model: Option<String>,
}

impl WebSocketConnector {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self { base_url, model }
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    type Client = duet_realtime::Client;

    async fn open(&self, key: &EphemeralKey) -> Result<Self::Client> {
        let mut builder = duet_realtime::Config::builder().with_api_key(key.secret().clone());
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        duet_realtime::connect(builder.build())
            .await
            .context("Failed to connect to the realtime agent session")
    }
}

/// The open client and the connect attempt that opened it.
struct OpenSession<C> {
    attempt: u64,
    client: C,
}

struct Shared<C> {
    session: tokio::sync::Mutex<Option<OpenSession<C>>>,
    /// Bumped by every connect and disconnect; a connect that finds it moved on was cancelled.
    generation: AtomicU64,
    status: broadcast::Sender<AgentStatusReport>,
    response_active: AtomicBool,
    output_muted: AtomicBool,
    sink: Mutex<Option<Arc<dyn AudioSink>>>,
}

impl<C: RealtimeClient> Shared<C> {
    fn publish(&self, attempt: u64, status: SessionStatus) {
        tracing::debug!(attempt, "agent session {}", status);
        if self.status.send(AgentStatusReport { attempt, status }).is_err() {
            tracing::debug!("no subscriber for agent status");
        }
    }

    fn flush_sink(&self) {
        if let Ok(sink) = self.sink.lock() {
            if let Some(sink) = sink.as_ref() {
                sink.flush();
            }
        }
    }

    /// Cancels the in-flight response, if there is one.
    async fn cancel_active_response(&self) -> Result<()> {
        if !self.response_active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(open) => open.client.cancel_response().await,
            None => Ok(()),
        }
    }
}

/// Where one connection's output goes.
struct OutputPath {
    sink: Arc<dyn AudioSink>,
    guardrails: Vec<Arc<dyn OutputGuardrail>>,
    extra_context: ExtraContext,
}

pub struct RealtimeAgentSession<K: RealtimeConnector> {
    connector: K,
    shared: Arc<Shared<K::Client>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<K: RealtimeConnector> RealtimeAgentSession<K> {
    pub fn new(connector: K) -> Self {
        let (status, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            connector,
            shared: Arc::new(Shared {
                session: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                status,
                response_active: AtomicBool::new(false),
                output_muted: AtomicBool::new(false),
                sink: Mutex::new(None),
            }),
            pump: Mutex::new(None),
        }
    }

    async fn open(&self, config: &AgentConnectConfig) -> Result<(K::Client, ServerRx)> {
        let mut client = self.connector.open(&config.key).await?;
        let events = client.server_events().await?;
        client
            .update_session(initial_session(&config.agent))
            .await
            .context("Failed to send the initial session configuration")?;
        Ok((client, events))
    }

    fn stop_pump(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(pump) = pump.take() {
                pump.abort();
            }
        }
    }
}

fn initial_session(agent: &AgentDefinition) -> Session {
    Session::new()
        .with_modalities_enable_audio()
        .with_instructions(&agent.instructions)
        .with_voice(agent.voice.clone())
        .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
        .build()
}

#[async_trait]
impl<K: RealtimeConnector> AgentSession for RealtimeAgentSession<K> {
    async fn connect(&self, config: AgentConnectConfig) -> Result<()> {
        if self.shared.session.lock().await.is_some() {
            return Err(anyhow!("agent session is already open"));
        }
        let attempt = config.attempt;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publish(attempt, SessionStatus::Connecting);

        let (mut client, events) = match self.open(&config).await {
            Ok(opened) => opened,
            Err(e) => {
                self.shared.publish(attempt, SessionStatus::Disconnected);
                return Err(e);
            }
        };

        let mut slot = self.shared.session.lock().await;
        if self.shared.generation.load(Ordering::SeqCst) != generation || slot.is_some() {
            drop(slot);
            tracing::info!(attempt, "agent connect cancelled while opening, closing the socket");
            if let Err(e) = client.disconnect().await {
                tracing::debug!("closing the cancelled agent socket failed: {:#}", e);
            }
            self.shared.publish(attempt, SessionStatus::Disconnected);
            return Err(anyhow!("agent connect for attempt {} was cancelled", attempt));
        }
        *slot = Some(OpenSession { attempt, client });

        if let Ok(mut sink) = self.shared.sink.lock() {
            *sink = Some(config.audio_sink.clone());
        }
        self.shared.response_active.store(false, Ordering::SeqCst);

        let output = OutputPath {
            sink: config.audio_sink,
            guardrails: config.output_guardrails,
            extra_context: config.extra_context,
        };
        // Stored before the slot unlocks so a disconnect always finds it.
        let pump = tokio::spawn(pump_server_events(self.shared.clone(), attempt, events, output));
        if let Ok(mut handle) = self.pump.lock() {
            if let Some(previous) = handle.replace(pump) {
                previous.abort();
            }
        }
        drop(slot);
        tracing::info!(agent = %config.agent.name, attempt, "agent socket open, waiting for session.created");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let open = {
            let mut slot = self.shared.session.lock().await;
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        let Some(OpenSession {
            attempt,
            mut client,
        }) = open
        else {
            return Ok(());
        };
        self.stop_pump();
        self.shared.response_active.store(false, Ordering::SeqCst);
        self.shared.flush_sink();
        let result = client.disconnect().await;
        self.shared.publish(attempt, SessionStatus::Disconnected);
        tracing::info!(attempt, "agent session closed");
        result
    }

    async fn send_event(&self, event: ClientEvent) -> Result<()> {
        let mut session = self.shared.session.lock().await;
        let open = session
            .as_mut()
            .ok_or_else(|| anyhow!("agent session is not connected"))?;
        open.client.send_event(event).await
    }

    async fn send_user_text(&self, text: &str) -> Result<()> {
        let item = MessageItem::builder()
            .with_role(MessageRole::User)
            .with_input_text(text)
            .build();

        let mut session = self.shared.session.lock().await;
        let client = &mut session
            .as_mut()
            .ok_or_else(|| anyhow!("agent session is not connected"))?
            .client;
        client
            .create_conversation_item(Item::Message(item))
            .await
            .context("Failed to create user message item")?;
        client
            .create_response()
            .await
            .context("Failed to request a response to the user message")
    }

    async fn interrupt(&self) -> Result<()> {
        // Queued audio goes either way; a cancel is only sent while a response is live.
        self.shared.flush_sink();
        self.shared.cancel_active_response().await
    }

    async fn mute(&self, muted: bool) -> Result<()> {
        self.shared.output_muted.store(muted, Ordering::SeqCst);
        tracing::debug!(muted, "agent output mute");
        Ok(())
    }

    fn status_events(&self) -> broadcast::Receiver<AgentStatusReport> {
        self.shared.status.subscribe()
    }
}

async fn pump_server_events<C: RealtimeClient + 'static>(
    shared: Arc<Shared<C>>,
    attempt: u64,
    mut events: ServerRx,
    output: OutputPath,
) {
    let mut transcript = TranscriptDebounce::new();
    // Set once a guardrail trips; audio for the rest of that response is dropped.
    let mut suppressed = false;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("agent server events lagged by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !matches!(event, ServerEvent::ResponseAudioDelta(_)) {
            if let Ok(json) = serde_json::to_value(&event) {
                output.extra_context.transcript.log_server_event(json);
            }
        }

        match event {
            ServerEvent::SessionCreated(_) => {
                tracing::info!("agent session created");
                shared.publish(attempt, SessionStatus::Connected);
            }
            ServerEvent::SessionUpdated(_) => {
                tracing::debug!("agent session configuration applied");
            }
            ServerEvent::ResponseCreated(created) => {
                tracing::debug!(response = created.response().id(), "response started");
                shared.response_active.store(true, Ordering::SeqCst);
                transcript.reset();
                suppressed = false;
            }
            ServerEvent::ResponseAudioDelta(delta) => {
                if suppressed || shared.output_muted.load(Ordering::SeqCst) {
                    continue;
                }
                output.sink.write(&decode_i16(delta.delta()));
            }
            ServerEvent::ResponseAudioTranscriptDelta(delta) => {
                if suppressed {
                    continue;
                }
                let due = transcript.push(delta.delta()).map(str::to_owned);
                if let Some(text) = due {
                    if let Some(trip) = run_guardrails(&output.guardrails, &text).await {
                        handle_trip(&shared, &output, trip).await;
                        suppressed = true;
                    }
                }
            }
            ServerEvent::ResponseAudioTranscriptDone(done) => {
                if !suppressed {
                    if let Some(trip) = run_guardrails(&output.guardrails, done.text()).await
                    {
                        handle_trip(&shared, &output, trip).await;
                        suppressed = true;
                    }
                }
                transcript.reset();
            }
            ServerEvent::ResponseDone(done) => {
                tracing::debug!(
                    response = done.response().id(),
                    status = ?done.response().status(),
                    "response finished"
                );
                shared.response_active.store(false, Ordering::SeqCst);
            }
            ServerEvent::InputAudioBufferSpeechStarted(_) => {
                tracing::debug!("agent detected speech start");
            }
            ServerEvent::InputAudioTranscriptionCompleted(done) => {
                tracing::info!("user said: {}", done.transcript());
            }
            ServerEvent::Error(e) => {
                tracing::warn!(
                    error_type = e.error().error_type(),
                    "agent session error: {}",
                    e.error().message()
                );
            }
            ServerEvent::Close { reason } => {
                tracing::info!("agent socket closed: {:?}", reason);
                break;
            }
            _ => {}
        }
    }

    // The server hung up on its own; forget the client so the next connect can proceed.
    {
        let mut slot = shared.session.lock().await;
        if slot.as_ref().is_some_and(|open| open.attempt == attempt) {
            slot.take();
            shared.response_active.store(false, Ordering::SeqCst);
        }
    }
    shared.publish(attempt, SessionStatus::Disconnected);
}

async fn handle_trip<C: RealtimeClient>(
    shared: &Shared<C>,
    output: &OutputPath,
    trip: GuardrailTrip,
) {
    tracing::warn!(
        guardrail = %trip.guardrail,
        category = %trip.category,
        "output guardrail tripped: {}",
        trip.rationale
    );
    output.extra_context.add_transcript_breadcrumb(
        "Output Guardrail Tripped",
        Some(serde_json::json!({
            "guardrail": trip.guardrail,
            "category": trip.category.to_string(),
            "rationale": trip.rationale,
        })),
    );
    output.sink.flush();
    if let Err(e) = shared.cancel_active_response().await {
        tracing::warn!("failed to cancel response after guardrail trip: {:#}", e);
    }
}
