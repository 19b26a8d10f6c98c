//! Service configuration, loaded once from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use duet_core::orchestrator::OrchestratorConfig;
use duet_core::turn::VadPolicy;
use tracing::Level;

pub const DEFAULT_TOKEN_URL: &str = "http://localhost:3000/api/session";
pub const DEFAULT_SESSION_NAME: &str = "test";
pub const DEFAULT_COMPANY_NAME: &str = "Zoom";
/// Playback ring buffer size: ten seconds of 24 kHz mono PCM16.
pub const PLAYBACK_BUFFER_SAMPLES: usize = 240_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub token_url: String,
    pub conference_token_url: Option<String>,
    pub realtime_url: Option<String>,
    pub realtime_model: Option<String>,
    pub session_name: String,
    pub display_name: String,
    pub push_to_talk: bool,
    pub playback_enabled: bool,
    pub vad: VadPolicy,
    pub credential_timeout: Option<Duration>,
    pub agent_file: Option<PathBuf>,
    pub audio_out: Option<PathBuf>,
    pub company_name: String,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Every variable is optional.
    ///
    // *   `DUET_TOKEN_URL`: Ephemeral-key endpoint. Defaults to `http://localhost:3000/api/session`.
    // *   `DUET_CONFERENCE_TOKEN_URL`: Conference join-token endpoint.
    // *   `DUET_REALTIME_URL` / `DUET_REALTIME_MODEL`: Agent session endpoint and model.
    // *   `DUET_SESSION_NAME` / `DUET_DISPLAY_NAME`: Conference to join and the name shown in it.
    // *   `DUET_PUSH_TO_TALK`, `DUET_PLAYBACK_ENABLED`: Initial toggles. Both default to true.
    // *   `DUET_VAD_*`: Voice-activity policy used while push-to-talk is off.
    // *   `DUET_CREDENTIAL_TIMEOUT_SECS`: Upper bound on a key fetch. Unbounded when unset.
    // *   `DUET_AGENT_FILE`, `DUET_AUDIO_OUT`, `DUET_COMPANY_NAME`: Agent definition, WAV output, guardrail scope.
    // *   `RUST_LOG`: The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let defaults = VadPolicy::default();
        let vad = VadPolicy {
            threshold: parse_or(&var, "DUET_VAD_THRESHOLD", defaults.threshold)?,
            prefix_padding_ms: parse_or(
                &var,
                "DUET_VAD_PREFIX_PADDING_MS",
                defaults.prefix_padding_ms,
            )?,
            silence_duration_ms: parse_or(
                &var,
                "DUET_VAD_SILENCE_DURATION_MS",
                defaults.silence_duration_ms,
            )?,
            create_response: parse_bool_or(
                &var,
                "DUET_VAD_CREATE_RESPONSE",
                defaults.create_response,
            )?,
        };
        if !(0.0..=1.0).contains(&vad.threshold) {
            return Err(ConfigError::InvalidValue {
                name: "DUET_VAD_THRESHOLD".to_string(),
                value: vad.threshold.to_string(),
            });
        }

        let credential_timeout = match var("DUET_CREDENTIAL_TIMEOUT_SECS") {
            Some(value) => {
                let secs: u64 = parse("DUET_CREDENTIAL_TIMEOUT_SECS", &value)?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            token_url: var("DUET_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            conference_token_url: var("DUET_CONFERENCE_TOKEN_URL"),
            realtime_url: var("DUET_REALTIME_URL"),
            realtime_model: var("DUET_REALTIME_MODEL"),
            session_name: var("DUET_SESSION_NAME")
                .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            display_name: var("DUET_DISPLAY_NAME").unwrap_or_else(default_display_name),
            push_to_talk: parse_bool_or(&var, "DUET_PUSH_TO_TALK", true)?,
            playback_enabled: parse_bool_or(&var, "DUET_PLAYBACK_ENABLED", true)?,
            vad,
            credential_timeout,
            agent_file: var("DUET_AGENT_FILE").map(PathBuf::from),
            audio_out: var("DUET_AUDIO_OUT").map(PathBuf::from),
            company_name: var("DUET_COMPANY_NAME")
                .unwrap_or_else(|| DEFAULT_COMPANY_NAME.to_string()),
            log_level,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            vad: self.vad.clone(),
            push_to_talk: self.push_to_talk,
            playback_enabled: self.playback_enabled,
            credential_timeout: self.credential_timeout,
            ..OrchestratorConfig::default()
        }
    }
}

fn default_display_name() -> String {
    format!("User-{}", chrono::Local::now().timestamp_millis() % 10_000)
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => parse(name, &value),
        None => Ok(default),
    }
}

fn parse_bool_or(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = var(name) else {
        return Ok(default);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_the_fixed_policy() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.session_name, "test");
        assert!(config.display_name.starts_with("User-"));
        assert!(config.push_to_talk);
        assert!(config.playback_enabled);
        assert_eq!(config.vad, VadPolicy::default());
        assert_eq!(config.credential_timeout, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("DUET_PUSH_TO_TALK", "off"),
            ("DUET_VAD_THRESHOLD", "0.7"),
            ("DUET_VAD_SILENCE_DURATION_MS", "800"),
            ("DUET_CREDENTIAL_TIMEOUT_SECS", "10"),
            ("DUET_COMPANY_NAME", "Acme"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();

        assert!(!config.push_to_talk);
        assert!((config.vad.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.vad.silence_duration_ms, 800);
        assert_eq!(config.vad.prefix_padding_ms, 300);
        assert_eq!(config.credential_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.company_name, "Acme");
        assert_eq!(config.log_level, Level::DEBUG);

        let orchestrator = config.orchestrator();
        assert!(!orchestrator.push_to_talk);
        assert_eq!(orchestrator.vad.silence_duration_ms, 800);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("DUET_PUSH_TO_TALK", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config_from(&[("DUET_VAD_THRESHOLD", "1.5")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config_from(&[("RUST_LOG", "chatty")]),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("DUET_SESSION_NAME", "  ")]).unwrap();
        assert_eq!(config.session_name, DEFAULT_SESSION_NAME);
    }
}
