//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::signal::StopSignal;
use super::utterance::{UtteranceDetector, UtteranceStatus};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the capture loop drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether the platform has a default input device
#[must_use]
pub fn input_available() -> bool {
    cpal::default_host().default_input_device().is_some()
}

/// Captures audio from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::CapabilityUnavailable("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self { device, config })
    }

    /// Record one utterance, blocking the calling thread
    ///
    /// Ends on trailing silence, after `max_duration`, or when `stop` is
    /// raised. Returns no samples if nobody spoke.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if stopped, or an audio error if the
    /// stream fails
    pub fn record_utterance(&self, stop: &StopSignal, max_duration: Duration) -> Result<Vec<f32>> {
        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(data);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        let mut detector = UtteranceDetector::new();
        let mut recorded = Vec::new();
        let start = Instant::now();

        let result = loop {
            if stop.is_raised() {
                break Err(Error::Cancelled);
            }

            std::thread::sleep(POLL_INTERVAL);
            let chunk =
                std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
            let status = detector.process(&chunk);
            if status == UtteranceStatus::Waiting {
                // Drops a blip the detector rejected
                recorded.clear();
            } else {
                recorded.extend_from_slice(&chunk);
            }

            match status {
                UtteranceStatus::Complete => break Ok(recorded),
                UtteranceStatus::NoSpeech => break Ok(Vec::new()),
                UtteranceStatus::Waiting | UtteranceStatus::Speaking => {}
            }

            if start.elapsed() > max_duration {
                tracing::debug!("capture hit the duration limit");
                break Ok(recorded);
            }
        };

        drop(stream);
        tracing::debug!("audio capture stopped");
        result
    }
}

/// Convert f32 samples to WAV bytes for the transcription endpoint
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_has_riff_header_and_samples() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 4);
    }
}
