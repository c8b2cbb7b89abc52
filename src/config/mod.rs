//! Configuration management for the triage console
//!
//! Values resolve env > TOML file > defaults.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::language::Language;
use crate::session::ClinicalListPolicy;
use crate::{Error, Result};

/// Default backend when nothing is configured
const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Triage console configuration
#[derive(Debug)]
pub struct Config {
    /// User identifier sent with `/conversation/start`
    pub user_id: String,

    /// Language used before the user picks one
    pub default_language: Option<Language>,

    /// Path to data directory (session database)
    pub data_dir: PathBuf,

    /// How symptom/diagnosis/medication lists evolve across turns
    pub clinical_lists: ClinicalListPolicy,

    /// Backend connection
    pub backend: BackendConfig,

    /// Voice configuration
    pub voice: VoiceConfig,
}

/// Backend connection configuration
#[derive(Debug)]
pub struct BackendConfig {
    /// Base URL of the diagnosis service
    pub url: String,

    /// Optional bearer key (from `TRIAGE_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Autocomplete cache lifetime in seconds
    pub suggestion_ttl_secs: u64,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable capture and playback
    pub enabled: bool,

    /// Speak assistant replies as they arrive
    pub auto_speak: bool,

    /// Backend TTS voice identifier
    pub tts_voice: Option<String>,

    /// Speech rate multiplier (0.5 to 2.0)
    pub tts_rate: f32,

    /// On-device synthesizer program override
    pub local_program: Option<PathBuf>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_speak: false,
            tts_voice: None,
            tts_rate: 1.0,
            local_program: None,
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();

        let user_id = std::env::var("TRIAGE_USER_ID")
            .ok()
            .or(fc.user_id)
            .unwrap_or_else(default_user_id);

        let default_language = std::env::var("TRIAGE_LANGUAGE")
            .ok()
            .or(fc.language)
            .map(|code| code.parse::<Language>())
            .transpose()?;

        let clinical_lists = std::env::var("TRIAGE_CLINICAL_LISTS")
            .ok()
            .or(fc.clinical_lists)
            .map(|policy| policy.parse::<ClinicalListPolicy>())
            .transpose()?
            .unwrap_or_default();

        let url = std::env::var("TRIAGE_BACKEND_URL")
            .ok()
            .or(fc.backend.url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        url::Url::parse(&url)
            .map_err(|e| Error::Config(format!("invalid backend url {url}: {e}")))?;

        let backend = BackendConfig {
            url,
            api_key: std::env::var("TRIAGE_API_KEY")
                .ok()
                .or(fc.backend.api_key)
                .map(SecretString::from),
            timeout_secs: std::env::var("TRIAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.backend.timeout_secs)
                .unwrap_or(30),
            suggestion_ttl_secs: fc.backend.suggestion_ttl_secs.unwrap_or(300),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            enabled: !disable_voice && fc.voice.enabled.unwrap_or(defaults.enabled),
            auto_speak: std::env::var("TRIAGE_AUTO_SPEAK")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.voice.auto_speak)
                .unwrap_or(defaults.auto_speak),
            tts_voice: std::env::var("TRIAGE_TTS_VOICE").ok().or(fc.voice.tts_voice),
            tts_rate: fc.voice.tts_rate.unwrap_or(defaults.tts_rate).clamp(0.5, 2.0),
            local_program: std::env::var("TRIAGE_LOCAL_TTS")
                .ok()
                .or(fc.voice.local_program)
                .map(PathBuf::from),
        };

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        // Determine data directory (~/.local/share/triage-console on Linux)
        let data_dir = std::env::var("TRIAGE_DATA_DIR")
            .ok()
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            user_id,
            default_language,
            data_dir,
            clinical_lists,
            backend,
            voice,
        })
    }

    /// Path of the session database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("session.db")
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/triage-console"),
        |d| d.data_dir().join("triage-console"),
    )
}

/// Local user id when none is configured: the login name, else "local-user"
fn default_user_id() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local-user".to_string())
}
