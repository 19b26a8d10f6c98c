use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use duet_core::conference::{ConferenceSession, VideoAction, join_conference};
use duet_core::credential::{CredentialProvider, HttpCredentialProvider};
use duet_core::guardrail::{ModerationGuardrail, OutputGuardrail};
use duet_core::orchestrator::{Adapters, AgentProfile, Orchestrator, OrchestratorHandle};
use duet_core::sink::BufferedAudioSink;
use duet_core::transcript::{ExtraContext, Transcript};
use duet_service::agent_loader::load_agent_or_default;
use duet_service::conference::LoopbackConference;
use duet_service::config::{Config, PLAYBACK_BUFFER_SAMPLES};
use duet_service::console::{ConsoleCommand, HELP, parse_command};
use duet_service::openai_adapter::{RealtimeAgentSession, WebSocketConnector};
use duet_service::sink::{PlaybackDrain, WavRecorder};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Joins a conference together with a voice agent")]
struct Cli {
    /// Conference session to join (overrides DUET_SESSION_NAME)
    #[arg(long)]
    session: Option<String>,
    /// Display name in the conference (overrides DUET_DISPLAY_NAME)
    #[arg(long)]
    name: Option<String>,
    /// Write agent audio to this WAV file (overrides DUET_AUDIO_OUT)
    #[arg(long)]
    audio_out: Option<PathBuf>,
    /// Join the conference right away
    #[arg(long)]
    join: bool,
}

struct App {
    config: Config,
    handle: OrchestratorHandle,
    conference: Arc<LoopbackConference>,
    credentials: Arc<HttpCredentialProvider>,
    transcript: Transcript,
}

impl App {
    async fn join(&self) -> Result<()> {
        if self.config.conference_token_url.is_some() {
            join_conference(
                self.conference.as_ref(),
                self.credentials.as_ref(),
                &self.config.session_name,
                &self.config.display_name,
            )
            .await
        } else {
            tracing::warn!("DUET_CONFERENCE_TOKEN_URL not set, joining the loopback conference with a local token");
            let token = SecretString::from("loopback".to_string());
            self.conference
                .join(&self.config.session_name, &token, &self.config.display_name)
                .await
        }
    }

    /// Runs one console command; returns `false` when the console should exit.
    async fn handle(&self, command: ConsoleCommand) -> Result<bool> {
        match command {
            ConsoleCommand::Join => self.join().await?,
            ConsoleCommand::Leave => self.conference.leave().await?,
            ConsoleCommand::ToggleMic => {
                if self.conference.is_audio_muted() {
                    self.conference.unmute_local_audio().await?
                } else {
                    self.conference.mute_local_audio().await?
                }
            }
            ConsoleCommand::ToggleCamera => {
                if self.conference.is_video_capturing() {
                    self.conference.stop_local_video().await?
                } else {
                    self.conference.start_local_video().await?
                }
            }
            ConsoleCommand::Agent(true) => self.handle.connect().await?,
            ConsoleCommand::Agent(false) => self.handle.disconnect().await?,
            ConsoleCommand::PushToTalk(active) => self.handle.set_push_to_talk(active).await?,
            ConsoleCommand::TalkDown => self.handle.talk_button_down().await?,
            ConsoleCommand::TalkUp => self.handle.talk_button_up().await?,
            ConsoleCommand::Playback(enabled) => self.handle.set_playback_enabled(enabled).await?,
            ConsoleCommand::Interrupt => self.handle.interrupt().await?,
            ConsoleCommand::Say(text) => self.handle.send_text(text).await?,
            ConsoleCommand::NetworkDrop => self.conference.simulate_network_drop()?,
            ConsoleCommand::PeerVideo { user_id, on } => {
                let action = if on { VideoAction::Start } else { VideoAction::Stop };
                self.conference.simulate_peer_video(user_id, action)?
            }
            ConsoleCommand::Status => {
                let snapshot = self.handle.sync().await?;
                println!(
                    "agent: {} | conference: {} | mode: {:?} | mic: {:?} | playback: {} | camera: {}",
                    snapshot.status,
                    snapshot
                        .conference
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "not joined".to_string()),
                    snapshot.turn_mode,
                    snapshot.mic,
                    if snapshot.playback_enabled { "on" } else { "off" },
                    if self.conference.is_video_capturing() { "on" } else { "off" },
                );
            }
            ConsoleCommand::Log => {
                for entry in self.transcript.entries() {
                    println!("{} {:?} {}", entry.at.format("%H:%M:%S%.3f"), entry.kind, entry.title);
                }
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => return Ok(false),
        }
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if let Some(session) = args.session {
        config.session_name = session;
    }
    if let Some(name) = args.name {
        config.display_name = name;
    }
    if args.audio_out.is_some() {
        config.audio_out = args.audio_out;
    }
    tracing::info!(
        session = %config.session_name,
        user = %config.display_name,
        "configuration loaded, starting duet"
    );

    // --- 4. Agent Profile ---
    let definition = load_agent_or_default(config.agent_file.as_deref())
        .context("Failed to load agent definition")?;
    tracing::info!(agent = %definition.name, voice = definition.voice.as_str(), "agent loaded");
    let transcript = Transcript::new();
    let guardrail: Arc<dyn OutputGuardrail> =
        Arc::new(ModerationGuardrail::new(config.company_name.clone()));
    let profile = AgentProfile {
        definition,
        guardrails: vec![guardrail],
        extra_context: ExtraContext::new(transcript.clone()),
    };

    // --- 5. Adapters ---
    let mut credentials = HttpCredentialProvider::new(config.token_url.clone());
    if let Some(url) = &config.conference_token_url {
        credentials = credentials.with_conference_url(url.clone());
    }
    let credentials = Arc::new(credentials);
    let conference = Arc::new(LoopbackConference::new());
    let sink = Arc::new(BufferedAudioSink::new(PLAYBACK_BUFFER_SAMPLES));
    let agent = Arc::new(RealtimeAgentSession::new(WebSocketConnector::new(
        config.realtime_url.clone(),
        config.realtime_model.clone(),
    )));
    let recorder = match &config.audio_out {
        Some(path) => Some(WavRecorder::start(sink.clone(), path)?),
        None => None,
    };
    let drain = recorder.is_none().then(|| PlaybackDrain::start(sink.clone()));

    // --- 6. Orchestrator ---
    let adapters = Adapters {
        agent,
        conference: conference.clone(),
        credentials: credentials.clone() as Arc<dyn CredentialProvider>,
        sink,
    };
    let (orchestrator, handle) = Orchestrator::new(config.orchestrator(), adapters, profile);
    let orchestrator_task = tokio::spawn(orchestrator.run());

    let app = App {
        config,
        handle: handle.clone(),
        conference: conference.clone(),
        credentials,
        transcript,
    };
    if args.join {
        if let Err(e) = app.join().await {
            tracing::error!("join failed: {:#}", e);
        }
    }

    // --- 7. Console ---
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => match app.handle(command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => tracing::warn!("{:#}", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down...");
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    if let Err(e) = conference.leave().await {
        tracing::warn!("leaving conference failed: {:#}", e);
    }
    handle.shutdown().await?;
    orchestrator_task.await.context("orchestrator task panicked")?;
    if let Some(recorder) = recorder {
        recorder.finish().await?;
    }
    if let Some(drain) = drain {
        drain.finish().await?;
    }
    Ok(())
}
