//! End-of-utterance detection
//!
//! Decides when a captured utterance is complete using signal energy:
//! wait for speech, then end after a stretch of trailing silence.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to accept (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Trailing silence that ends an utterance (in samples)
const SILENCE_SAMPLES: usize = 12_000; // 0.75 seconds

/// Give up if nobody starts speaking within this many samples
const NO_SPEECH_SAMPLES: usize = 16_000 * 8; // 8 seconds

/// Progress of the utterance being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceStatus {
    /// No speech heard yet
    Waiting,
    /// Speech in progress
    Speaking,
    /// Speech followed by enough silence
    Complete,
    /// Nobody spoke before the deadline
    NoSpeech,
}

/// Tracks one utterance across incoming sample chunks
#[derive(Debug)]
pub struct UtteranceDetector {
    status: UtteranceStatus,
    speech_samples: usize,
    silence_counter: usize,
    waited: usize,
}

impl Default for UtteranceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceDetector {
    /// Create a detector waiting for speech
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: UtteranceStatus::Waiting,
            speech_samples: 0,
            silence_counter: 0,
            waited: 0,
        }
    }

    /// Feed a chunk of samples and return the updated status
    pub fn process(&mut self, samples: &[f32]) -> UtteranceStatus {
        if samples.is_empty() {
            return self.status;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.status {
            UtteranceStatus::Waiting => {
                if is_speech {
                    self.status = UtteranceStatus::Speaking;
                    self.speech_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                } else {
                    self.waited += samples.len();
                    if self.waited > NO_SPEECH_SAMPLES {
                        self.status = UtteranceStatus::NoSpeech;
                    }
                }
            }
            UtteranceStatus::Speaking => {
                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES {
                    // A blip too short to be speech: keep waiting
                    if self.speech_samples > MIN_SPEECH_SAMPLES {
                        tracing::debug!(samples = self.speech_samples, "utterance complete");
                        self.status = UtteranceStatus::Complete;
                    } else {
                        self.status = UtteranceStatus::Waiting;
                        self.speech_samples = 0;
                        self.silence_counter = 0;
                    }
                }
            }
            UtteranceStatus::Complete | UtteranceStatus::NoSpeech => {}
        }

        self.status
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> UtteranceStatus {
        self.status
    }

    /// Whether capture can stop
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(
            self.status,
            UtteranceStatus::Complete | UtteranceStatus::NoSpeech
        )
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
