use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use triage_console::backend::{Profile, sniff_image_type};
use triage_console::db::{self, SnapshotRepo};
use triage_console::session::{Role, Snapshot};
use triage_console::voice::{
    AudioArbiter, AudioCapture, AudioSink, CpalPlayback, SAMPLE_RATE, SpeechOutcome, StopSwitch,
    samples_to_wav,
};
use triage_console::{
    Banner, Config, ConversationBackend, HttpBackend, Language, SessionStore, TurnController,
    TurnOutcome,
};

/// Triage - multilingual symptom-triage console
#[derive(Parser)]
#[command(name = "triage", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (for machines without audio hardware)
    #[arg(long, env = "TRIAGE_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Interactive consultation (default)
    Chat,
    /// Test microphone input
    TestMic {
        /// Longest recording in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output through the provider chain
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,

        /// Language to speak in
        #[arg(short, long, default_value = "en")]
        language: Language,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,triage_console=warn",
        1 => "info,triage_console=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(cli.disable_voice).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text, language } => test_tts(&text, language).await,
    }
}

/// Interactive consultation loop
async fn chat(disable_voice: bool) -> anyhow::Result<()> {
    let config = Config::load_with_options(disable_voice)?;
    tracing::debug!(?config, "loaded configuration");

    let pool = db::init(config.database_path())?;
    let store = Arc::new(SessionStore::init(
        Some(SnapshotRepo::new(pool)),
        &config.user_id,
        config.clinical_lists,
    ));
    if let Some(language) = config.default_language {
        if store.read(|s| s.current_language.is_none()) {
            store.set_language(language);
        }
    }

    let http = Arc::new(HttpBackend::from_config(&config)?);
    let backend: Arc<dyn ConversationBackend> = http.clone();
    let audio = Arc::new(AudioArbiter::from_config(&config, Arc::clone(&backend)));
    let controller = Arc::new(
        TurnController::new(Arc::clone(&store), backend).with_audio(audio, config.voice.auto_speak),
    );

    println!("Triage console connected to {}", http.base_url());
    println!("Type your symptoms, or /help for commands.\n");
    replay(&store.snapshot());

    if store.read(|s| s.session_id().is_none()) {
        match controller.start_consultation().await {
            Ok(Some(greeting)) => println!("assistant> {}", greeting.display_text()),
            Ok(None) => {}
            Err(e) => println!("! could not start a consultation yet: {e}"),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, argument) = line
            .split_once(' ')
            .map_or((line, ""), |(c, a)| (c, a.trim()));

        match command {
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/cancel" => {
                if !controller.cancel() {
                    println!("(nothing to cancel)");
                }
            }
            "/lang" => match argument.parse::<Language>() {
                Ok(language) => {
                    store.set_language(language);
                    println!("(language set to {language})");
                }
                Err(e) => println!("! {e}"),
            },
            "/listen" => spawn_listen(&controller),
            "/speak" => spawn_speak_last(&controller),
            "/stop" => {
                if let Some(audio) = controller.audio() {
                    audio.stop();
                }
            }
            "/dismiss" => match store.dismiss_banner() {
                Some(banner) => println!("(dismissed {})", banner_label(banner)),
                None => println!("(no banner to dismiss)"),
            },
            "/suggest" => {
                let language = store.read(|s| s.effective_language());
                match http.autocomplete(argument, language).await {
                    Ok(suggestions) if suggestions.is_empty() => println!("(no suggestions)"),
                    Ok(suggestions) => println!("suggestions: {}", suggestions.join(", ")),
                    Err(e) => println!("! {e}"),
                }
            }
            "/image" => {
                let language = store.read(|s| s.effective_language());
                analyze_image(&http, argument, language).await;
            }
            "/profile" => {
                let user_id = store.read(|s| s.user_id.clone());
                match http.fetch_profile(&user_id).await {
                    Ok(profile) => print_profile(&profile),
                    Err(e) => println!("! {e}"),
                }
            }
            "/status" => print_status(&store.snapshot()),
            "/clear" => {
                store.clear();
                println!("(history cleared)");
            }
            other if other.starts_with('/') => println!("! unknown command {other}, try /help"),
            _ => spawn_submit(&controller, line.to_string()),
        }
    }

    if let Some(audio) = controller.audio() {
        audio.stop();
    }
    Ok(())
}

async fn analyze_image(http: &HttpBackend, path: &str, language: Language) {
    if path.is_empty() {
        println!("! usage: /image <path>");
        return;
    }
    let image = match tokio::fs::read(path).await {
        Ok(image) => image,
        Err(e) => {
            println!("! cannot read {path}: {e}");
            return;
        }
    };
    let Some(mime_type) = sniff_image_type(&image) else {
        println!("! {path} is not a JPEG, PNG, GIF or WebP image");
        return;
    };

    match http.analyze_image(&image, mime_type, language).await {
        Ok(analysis) => {
            if let Some(summary) = &analysis.summary {
                println!("{summary}");
            }
            for finding in &analysis.findings {
                match finding.confidence {
                    Some(c) => println!("  - {} ({:.0}%)", finding.label, c * 100.0),
                    None => println!("  - {}", finding.label),
                }
            }
        }
        Err(e) => println!("! {e}"),
    }
}

fn print_profile(profile: &Profile) {
    println!("user: {}", profile.name.as_deref().unwrap_or(&profile.user_id));
    if let Some(age) = profile.age {
        println!("age: {age}");
    }
    if let Some(language) = profile.preferred_language {
        println!("preferred language: {language}");
    }
    if !profile.conditions.is_empty() {
        println!("conditions: {}", profile.conditions.join(", "));
    }
    if !profile.allergies.is_empty() {
        println!("allergies: {}", profile.allergies.join(", "));
    }
}

fn spawn_submit(controller: &Arc<TurnController>, text: String) {
    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        let outcome = controller.submit(&text).await;
        print_outcome(&controller, &outcome);
    });
}

fn spawn_listen(controller: &Arc<TurnController>) {
    let Some(audio) = controller.audio().cloned() else {
        println!("! voice is disabled");
        return;
    };
    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        let language = controller.store().read(|s| s.effective_language());
        println!("(listening...)");
        match audio.listen(language).await {
            Ok(text) if text.is_empty() => println!("(heard nothing)"),
            Ok(text) => {
                println!("you (voice)> {text}");
                let outcome = controller.submit(&text).await;
                print_outcome(&controller, &outcome);
            }
            Err(e) => println!("! {e}"),
        }
    });
}

fn spawn_speak_last(controller: &Arc<TurnController>) {
    let Some(audio) = controller.audio().cloned() else {
        println!("! voice is disabled");
        return;
    };
    let last = controller.store().read(|s| {
        s.transcript
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| (t.display_text().to_string(), t.language))
    });
    let Some((text, language)) = last else {
        println!("(nothing to speak)");
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = audio.speak(&text, language).await {
            println!("! {e}");
        }
    });
}

fn print_outcome(controller: &TurnController, outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Answered(turn) => {
            println!("assistant> {}", turn.display_text());
            print_banners(&controller.store().snapshot());
        }
        TurnOutcome::Failed { turn, .. } => println!("! {}", turn.text),
        TurnOutcome::Discarded => {}
    }
}

fn print_help() {
    println!("  /cancel          cancel the pending request");
    println!("  /lang <code>     choose a language (en, hi, ta, ...)");
    println!("  /listen          speak your message");
    println!("  /speak           read the last reply aloud");
    println!("  /stop            stop listening or speaking");
    println!("  /dismiss         dismiss the top banner");
    println!("  /suggest <text>  symptom suggestions");
    println!("  /image <path>    analyze a photo of the affected area");
    println!("  /profile         show your profile");
    println!("  /status          urgency, symptoms and diagnoses");
    println!("  /clear           clear the history");
    println!("  /quit            leave");
}

const fn banner_label(banner: Banner) -> &'static str {
    match banner {
        Banner::Crisis => "crisis banner",
        Banner::Emergency => "emergency banner",
        Banner::SupportPanel => "support panel",
    }
}

fn print_banners(snapshot: &Snapshot) {
    for banner in snapshot.session.triage.banners() {
        match banner {
            Banner::Crisis => println!(
                "!! If you are thinking about harming yourself, please contact a crisis helpline or emergency services now."
            ),
            Banner::Emergency => {
                println!("!! EMERGENCY: seek immediate medical care or call emergency services.");
                for flag in snapshot.session.triage.red_flags() {
                    println!("   - {flag}");
                }
            }
            Banner::SupportPanel => {
                println!("!  Support is available. Talking to a counsellor can help.");
            }
        }
    }
}

fn replay(snapshot: &Snapshot) {
    let transcript = &snapshot.session.transcript;
    if transcript.is_empty() {
        return;
    }
    println!("(restored {} earlier messages)", transcript.len());
    for turn in transcript.iter().rev().take(6).rev() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{who}> {}", turn.display_text());
    }
    print_banners(snapshot);
    println!();
}

fn print_status(snapshot: &Snapshot) {
    let session = &snapshot.session;
    println!(
        "session:   {}",
        session.session_id().unwrap_or("(not started)")
    );
    println!("language:  {}", session.effective_language());
    println!(
        "urgency:   {}",
        session
            .triage_level()
            .map_or_else(|| "unknown".to_string(), |l| l.to_string())
    );
    if !session.clinical.symptoms.is_empty() {
        println!("symptoms:  {}", session.clinical.symptoms.join(", "));
    }
    for diagnosis in &session.clinical.diagnoses {
        match diagnosis.confidence {
            Some(c) => println!("diagnosis: {} ({:.0}%)", diagnosis.name, c * 100.0),
            None => println!("diagnosis: {}", diagnosis.name),
        }
    }
    for medication in &session.clinical.medications {
        println!(
            "medication: {}{}",
            medication.name,
            medication
                .dosage
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default()
        );
    }
    print_banners(snapshot);
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Recording one utterance (up to {duration} seconds)...");
    println!("Speak into your microphone!\n");

    let switch = StopSwitch::new();
    let signal = switch.arm();
    let samples = tokio::task::spawn_blocking(move || {
        AudioCapture::new()?.record_utterance(&signal, Duration::from_secs(duration))
    })
    .await??;

    let energy = calculate_rms(&samples);
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

    #[allow(clippy::cast_precision_loss)]
    let seconds = samples.len() as f32 / SAMPLE_RATE as f32;
    println!("Captured {seconds:.1}s | RMS: {energy:.4} | Peak: {peak:.4}");

    println!("\n---");
    if samples.is_empty() {
        println!("No speech detected. Check:");
        println!("  1. Is your mic plugged in?");
        println!("  2. Run: pactl info | grep 'Default Source'");
        println!("  3. Run: arecord -l (to list devices)");
    } else {
        println!("Your mic is working!");
    }

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    let playback = CpalPlayback::new();
    if !playback.is_available() {
        anyhow::bail!("no output device available");
    }
    playback.play(samples_to_wav(&samples, sample_rate)?).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output through the configured providers
async fn test_tts(text: &str, language: Language) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let backend: Arc<dyn ConversationBackend> = Arc::new(HttpBackend::from_config(&config)?);
    let audio = AudioArbiter::from_config(&config, backend);

    println!("Speaking...");
    match audio.speak(text, language).await? {
        SpeechOutcome::Completed => println!("\n---\nIf you heard the speech, TTS is working!"),
        SpeechOutcome::Stopped => println!("Playback was stopped"),
        SpeechOutcome::Skipped => println!("Nothing speakable in that text"),
    }

    Ok(())
}
