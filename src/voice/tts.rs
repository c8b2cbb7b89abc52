//! Text-to-speech providers
//!
//! Providers are tried in order by the arbiter: the backend synthesizer
//! first, then an on-device program.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;

use super::playback::AudioSink;
use crate::backend::{ConversationBackend, VoiceOptions};
use crate::language::Language;
use crate::{Error, Result};

/// Words per minute at rate 1.0 for the on-device synthesizers
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// One way of turning text into audible speech
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether this provider can run on this machine
    fn is_available(&self) -> bool;

    /// Speak `text` to completion
    async fn speak(&self, text: &str, language: Language) -> Result<()>;

    /// Release the output device if this provider holds it
    fn halt(&self);
}

/// Backend synthesis played through an audio sink
pub struct NetworkSpeech {
    backend: Arc<dyn ConversationBackend>,
    sink: Arc<dyn AudioSink>,
    voice: VoiceOptions,
}

impl NetworkSpeech {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        sink: Arc<dyn AudioSink>,
        voice: VoiceOptions,
    ) -> Self {
        Self {
            backend,
            sink,
            voice,
        }
    }
}

#[async_trait]
impl SpeechProvider for NetworkSpeech {
    fn name(&self) -> &'static str {
        "network"
    }

    fn is_available(&self) -> bool {
        self.sink.is_available()
    }

    async fn speak(&self, text: &str, language: Language) -> Result<()> {
        let audio = self.backend.synthesize(text, language, &self.voice).await?;
        self.sink.play(audio).await
    }

    fn halt(&self) {
        self.sink.halt();
    }
}

/// Command-line flavour of an on-device synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Synthesizer {
    /// `espeak-ng` or `espeak`
    Espeak,
    /// macOS `say`
    Say,
}

/// On-device synthesis through a locally installed program
#[derive(Debug)]
pub struct SystemSpeech {
    program: PathBuf,
    synthesizer: Synthesizer,
    rate: f32,
    halt: watch::Sender<u64>,
}

impl SystemSpeech {
    /// Programs searched for when no override is configured
    pub const CANDIDATES: [&'static str; 3] = ["espeak-ng", "espeak", "say"];

    /// Locate a synthesizer on `PATH`, or use the configured program
    #[must_use]
    pub fn detect(program: Option<&Path>, rate: f32) -> Option<Self> {
        let found = match program {
            Some(path) => which::which(path).ok(),
            None => Self::CANDIDATES
                .iter()
                .find_map(|name| which::which(name).ok()),
        };

        let Some(program) = found else {
            tracing::debug!("no on-device speech synthesizer found");
            return None;
        };

        tracing::debug!(program = %program.display(), "on-device speech synthesizer found");
        Some(Self::with_program(program, rate))
    }

    /// Use a specific synthesizer program
    #[must_use]
    pub fn with_program(program: PathBuf, rate: f32) -> Self {
        let synthesizer = match program.file_stem().and_then(|s| s.to_str()) {
            Some("say") => Synthesizer::Say,
            _ => Synthesizer::Espeak,
        };
        let (halt, _) = watch::channel(0);
        Self {
            program,
            synthesizer,
            rate,
            halt,
        }
    }

    /// Program this provider runs
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command line for one utterance; the text itself goes in on stdin so
    /// replies starting with `-` are never read as options
    fn arguments(&self, language: Language) -> Vec<String> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let wpm = (BASE_WORDS_PER_MINUTE * self.rate).round() as u32;
        match self.synthesizer {
            Synthesizer::Espeak => vec![
                "-v".to_string(),
                language.code().to_string(),
                "-s".to_string(),
                wpm.to_string(),
                "--stdin".to_string(),
            ],
            Synthesizer::Say => vec![
                "-r".to_string(),
                wpm.to_string(),
                "-f".to_string(),
                "-".to_string(),
            ],
        }
    }
}

#[async_trait]
impl SpeechProvider for SystemSpeech {
    fn name(&self) -> &'static str {
        "system"
    }

    fn is_available(&self) -> bool {
        self.program.exists()
    }

    async fn speak(&self, text: &str, language: Language) -> Result<()> {
        let mut halted = self.halt.subscribe();
        let mut child = Command::new(&self.program)
            .args(self.arguments(language))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to start {}: {e}", self.program.display())))?;

        let stdin = child.stdin.take();
        let finished = async {
            if let Some(mut stdin) = stdin {
                stdin.write_all(text.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait().await
        };

        tokio::select! {
            status = finished => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::Tts(format!("{} exited with {status}", self.program.display())))
                }
            }
            _ = halted.changed() => {
                // Dropping the child kills it
                Err(Error::Cancelled)
            }
        }
    }

    fn halt(&self) {
        self.halt.send_modify(|epoch| *epoch += 1);
    }
}
