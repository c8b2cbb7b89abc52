//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::signal::{StopSignal, StopSwitch};
use crate::{Error, Result};

/// Destination for synthesized audio
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Whether an output device exists
    fn is_available(&self) -> bool;

    /// Play encoded audio (MP3 or WAV) to completion
    ///
    /// Returns [`Error::Cancelled`] if halted part way.
    async fn play(&self, audio: Vec<u8>) -> Result<()>;

    /// Stop whatever is playing
    fn halt(&self);
}

/// Decoded mono PCM
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Plays audio to the default output device
#[derive(Debug, Default)]
pub struct CpalPlayback {
    stop: StopSwitch,
}

impl CpalPlayback {
    /// Create a playback sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioSink for CpalPlayback {
    fn is_available(&self) -> bool {
        cpal::default_host().default_output_device().is_some()
    }

    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        let signal = self.stop.arm();
        tokio::task::spawn_blocking(move || {
            let pcm = decode(&audio)?;
            play_blocking(&pcm, &signal)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn halt(&self) {
        self.stop.raise();
    }
}

/// Find an output config for the given rate, mono first, then stereo
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| Error::Audio(format!("no output config for {sample_rate} Hz")))?;
    Ok(supported.with_sample_rate(rate).config())
}

/// Play samples on the calling thread until done or stopped
fn play_blocking(pcm: &Pcm, stop: &StopSignal) -> Result<()> {
    if pcm.samples.is_empty() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::CapabilityUnavailable("no output device available".to_string()))?;
    let config = output_config(&device, pcm.sample_rate)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = pcm.sample_rate,
        channels,
        "audio playback starting"
    );

    let samples = Arc::new(pcm.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(pcm.sample_rate);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    let mut halted = false;
    while !finished.load(Ordering::Relaxed) {
        if stop.is_raised() {
            halted = true;
            break;
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if !halted {
        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), halted, "playback complete");

    if halted {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Decode synthesized audio, WAV if it carries a RIFF header, MP3 otherwise
///
/// # Errors
///
/// Returns error if the bytes cannot be decoded
pub fn decode(audio: &[u8]) -> Result<Pcm> {
    if audio.starts_with(b"RIFF") {
        decode_wav(audio)
    } else {
        decode_mp3(audio)
    }
}

fn decode_wav(wav: &[u8]) -> Result<Pcm> {
    let reader =
        hound::WavReader::new(Cursor::new(wav)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let v = v as f32;
                    v / scale
                }))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(Pcm {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames in synthesized audio".to_string()));
    }

    Ok(Pcm {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
