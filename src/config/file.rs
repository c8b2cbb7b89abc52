//! TOML configuration file loading
//!
//! Supports `~/.config/triage-console/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConsoleConfigFile {
    /// User identifier sent to the backend
    #[serde(default)]
    pub user_id: Option<String>,

    /// Default conversation language code (e.g. "hi")
    #[serde(default)]
    pub language: Option<String>,

    /// Data directory override
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Clinical list policy: "replace" or "accumulate"
    #[serde(default)]
    pub clinical_lists: Option<String>,

    /// Backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the diagnosis service
    pub url: Option<String>,

    /// Bearer key for the diagnosis service
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Autocomplete cache lifetime in seconds
    pub suggestion_ttl_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// Speak every assistant reply
    pub auto_speak: Option<bool>,

    /// Backend TTS voice identifier
    pub tts_voice: Option<String>,

    /// Speech rate multiplier
    pub tts_rate: Option<f32>,

    /// On-device synthesizer program (e.g. "espeak-ng")
    pub local_program: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConsoleConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConsoleConfigFile {
    let Some(path) = config_file_path() else {
        return ConsoleConfigFile::default();
    };

    if !path.exists() {
        return ConsoleConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            ConsoleConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConsoleConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config(content: &str) -> crate::Result<ConsoleConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/triage-console/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("triage-console").join("config.toml"))
}
