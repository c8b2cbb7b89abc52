//! Voice input and output
//!
//! The [`AudioArbiter`] owns the microphone and the speakers. At most one
//! of capture and playback is active; starting either stops the other.
//! Speech output walks an ordered provider list until one succeeds.

mod capture;
mod playback;
mod signal;
mod stt;
mod text;
mod tts;
mod utterance;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::backend::{ConversationBackend, VoiceOptions};
use crate::config::Config;
use crate::language::Language;
use crate::{Error, Result};

pub use capture::{AudioCapture, SAMPLE_RATE, input_available, samples_to_wav};
pub use playback::{AudioSink, CpalPlayback, Pcm, decode};
pub use signal::{StopSignal, StopSwitch};
pub use stt::{MAX_UTTERANCE, MicrophoneRecognizer, SpeechRecognizer};
pub use text::strip_for_speech;
pub use tts::{NetworkSpeech, SpeechProvider, SystemSpeech};
pub use utterance::{UtteranceDetector, UtteranceStatus};

/// What the audio devices are doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioState {
    Idle,
    Listening,
    Speaking,
}

/// How a speak request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// A provider spoke the whole text
    Completed,
    /// Stopped, or preempted by another audio request
    Stopped,
    /// Nothing speakable left after stripping markup
    Skipped,
}

/// Exclusive owner of capture and playback
pub struct AudioArbiter {
    state: watch::Sender<AudioState>,
    /// Identifies the current activity; bumped by every begin and stop
    epoch: Mutex<u64>,
    /// Bumped to preempt whatever activity is running
    halt: watch::Sender<u64>,
    /// Held while a provider or the recognizer touches a device
    device: tokio::sync::Mutex<()>,
    providers: Vec<Arc<dyn SpeechProvider>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    playback_reported: AtomicBool,
    capture_reported: AtomicBool,
}

impl AudioArbiter {
    /// Create an arbiter over an ordered provider chain
    #[must_use]
    pub fn new(
        providers: Vec<Arc<dyn SpeechProvider>>,
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
    ) -> Self {
        let (state, _) = watch::channel(AudioState::Idle);
        let (halt, _) = watch::channel(0);
        Self {
            state,
            epoch: Mutex::new(0),
            halt,
            device: tokio::sync::Mutex::new(()),
            providers,
            recognizer,
            playback_reported: AtomicBool::new(false),
            capture_reported: AtomicBool::new(false),
        }
    }

    /// Arbiter with no devices; every request reports the capability missing
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Build the device stack described by the configuration
    #[must_use]
    pub fn from_config(config: &Config, backend: Arc<dyn ConversationBackend>) -> Self {
        if !config.voice.enabled {
            tracing::info!("voice disabled");
            return Self::disabled();
        }

        let voice = VoiceOptions {
            voice: config.voice.tts_voice.clone(),
            rate: config.voice.tts_rate,
        };
        let sink: Arc<dyn AudioSink> = Arc::new(CpalPlayback::new());

        let mut providers: Vec<Arc<dyn SpeechProvider>> = vec![Arc::new(NetworkSpeech::new(
            Arc::clone(&backend),
            sink,
            voice,
        ))];
        if let Some(system) =
            SystemSpeech::detect(config.voice.local_program.as_deref(), config.voice.tts_rate)
        {
            providers.push(Arc::new(system));
        }

        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(MicrophoneRecognizer::new(backend));
        Self::new(providers, Some(recognizer))
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AudioState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AudioState> {
        self.state.subscribe()
    }

    /// Speak text, stopping any capture or playback first
    ///
    /// Decorative markup and emoji are stripped before synthesis. Providers
    /// are tried in order; a failing provider hands over to the next.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] if no provider can run here,
    /// or the last provider's error if every provider failed
    pub async fn speak(&self, text: &str, language: Language) -> Result<SpeechOutcome> {
        let speech = strip_for_speech(text);
        if speech.is_empty() {
            return Ok(SpeechOutcome::Skipped);
        }

        let available: Vec<Arc<dyn SpeechProvider>> = self
            .providers
            .iter()
            .filter(|p| p.is_available())
            .cloned()
            .collect();
        if available.is_empty() {
            if !self.playback_reported.swap(true, Ordering::Relaxed) {
                tracing::warn!("no speech output available on this platform");
            }
            return Err(Error::CapabilityUnavailable("speech playback".to_string()));
        }

        let (epoch, mut halt) = self.begin(AudioState::Speaking);
        let work = async {
            let _device = self.device.lock().await;
            speak_with(&available, &speech, language).await
        };

        let result = tokio::select! {
            biased;
            _ = halt.changed() => Ok(SpeechOutcome::Stopped),
            result = work => match result {
                Ok(()) => Ok(SpeechOutcome::Completed),
                Err(Error::Cancelled) => Ok(SpeechOutcome::Stopped),
                Err(e) => Err(e),
            },
        };

        self.finish(epoch);
        result
    }

    /// Capture one utterance, stopping any playback first
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] immediately if the platform
    /// cannot capture speech, [`Error::Cancelled`] if stopped or preempted,
    /// or the recognizer's error
    pub async fn listen(&self, language: Language) -> Result<String> {
        let recognizer = match &self.recognizer {
            Some(recognizer) if recognizer.is_available() => Arc::clone(recognizer),
            _ => {
                if !self.capture_reported.swap(true, Ordering::Relaxed) {
                    tracing::warn!("no speech capture available on this platform");
                }
                return Err(Error::CapabilityUnavailable("speech capture".to_string()));
            }
        };

        let (epoch, mut halt) = self.begin(AudioState::Listening);
        let work = async {
            let _device = self.device.lock().await;
            recognizer.recognize(language).await
        };

        let result = tokio::select! {
            biased;
            _ = halt.changed() => Err(Error::Cancelled),
            result = work => result,
        };

        self.finish(epoch);
        result
    }

    /// Stop capture and playback and return to idle
    pub fn stop(&self) {
        let was = {
            let mut epoch = self.lock_epoch();
            let was = *self.state.borrow();
            if was != AudioState::Idle {
                *epoch += 1;
                self.halt.send_modify(|h| *h += 1);
                self.state.send_replace(AudioState::Idle);
            }
            was
        };

        if was != AudioState::Idle {
            tracing::debug!(from = ?was, "audio stopped");
            self.release_devices();
        }
    }

    /// Enter `next`, preempting the running activity
    ///
    /// Returns the new epoch and a receiver that fires when this activity
    /// is preempted in turn.
    fn begin(&self, next: AudioState) -> (u64, watch::Receiver<u64>) {
        let (epoch, halt, previous) = {
            let mut epoch = self.lock_epoch();
            let previous = *self.state.borrow();
            if previous != AudioState::Idle {
                self.halt.send_modify(|h| *h += 1);
            }
            let halt = self.halt.subscribe();
            *epoch += 1;
            self.state.send_replace(next);
            (*epoch, halt, previous)
        };

        if previous != AudioState::Idle {
            tracing::debug!(from = ?previous, to = ?next, "preempting audio");
            self.release_devices();
        }
        (epoch, halt)
    }

    /// Return to idle unless a newer activity took over
    fn finish(&self, epoch: u64) {
        let current = self.lock_epoch();
        if *current == epoch {
            self.state.send_replace(AudioState::Idle);
        }
    }

    fn release_devices(&self) {
        for provider in &self.providers {
            provider.halt();
        }
        if let Some(recognizer) = &self.recognizer {
            recognizer.abort();
        }
    }

    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Try each provider in order until one speaks the text
async fn speak_with(
    providers: &[Arc<dyn SpeechProvider>],
    text: &str,
    language: Language,
) -> Result<()> {
    let mut last_error = None;
    for provider in providers {
        match provider.speak(text, language).await {
            Ok(()) => {
                tracing::debug!(provider = provider.name(), "speech complete");
                return Ok(());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(provider = provider.name(), error = %e, "speech provider failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::CapabilityUnavailable("speech playback".to_string())))
}
