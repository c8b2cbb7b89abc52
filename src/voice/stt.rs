//! Speech-to-text through the microphone and the backend transcriber

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::capture::{self, AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::signal::StopSwitch;
use crate::backend::ConversationBackend;
use crate::language::Language;
use crate::{Error, Result};

/// Longest single utterance recorded
pub const MAX_UTTERANCE: Duration = Duration::from_secs(30);

/// Turns one spoken utterance into text
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Whether the platform can capture speech
    fn is_available(&self) -> bool;

    /// Listen for one utterance and return its transcript
    ///
    /// An empty string means nothing was said.
    async fn recognize(&self, language: Language) -> Result<String>;

    /// Release the microphone
    fn abort(&self);
}

/// Records from the default input device and transcribes via the backend
pub struct MicrophoneRecognizer {
    backend: Arc<dyn ConversationBackend>,
    stop: StopSwitch,
    max_duration: Duration,
}

impl MicrophoneRecognizer {
    #[must_use]
    pub fn new(backend: Arc<dyn ConversationBackend>) -> Self {
        Self {
            backend,
            stop: StopSwitch::new(),
            max_duration: MAX_UTTERANCE,
        }
    }

    /// Override the utterance length limit
    #[must_use]
    pub const fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}

#[async_trait]
impl SpeechRecognizer for MicrophoneRecognizer {
    fn is_available(&self) -> bool {
        capture::input_available()
    }

    async fn recognize(&self, language: Language) -> Result<String> {
        let signal = self.stop.arm();
        let max_duration = self.max_duration;

        let samples = tokio::task::spawn_blocking(move || {
            AudioCapture::new()?.record_utterance(&signal, max_duration)
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))??;

        if samples.is_empty() {
            tracing::debug!("no speech captured");
            return Ok(String::new());
        }

        #[allow(clippy::cast_precision_loss)]
        let seconds = samples.len() as f32 / SAMPLE_RATE as f32;
        tracing::debug!(seconds, "utterance captured");

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        let text = self.backend.transcribe(wav, language).await?;
        Ok(text.trim().to_string())
    }

    fn abort(&self) {
        self.stop.raise();
    }
}
