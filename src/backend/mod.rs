//! Backend diagnosis service contract
//!
//! The symptom extraction and ranking live in an external HTTP service.
//! [`ConversationBackend`] is the seam the turn controller and the speech
//! providers talk through; [`HttpBackend`] is the production implementation.

mod http;
mod lookup;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::language::Language;
use crate::session::{ClinicalState, Diagnosis, Medication, MentalHealthFlags};
use crate::triage::{Classification, CrisisSeverity, TriageLevel};

pub use http::HttpBackend;
pub use lookup::{ImageAnalysis, ImageFinding, Profile, SuggestionCache, sniff_image_type};

/// Conversation and speech endpoints of the backend
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// `POST /conversation/start`
    async fn start_session(&self, user_id: &str, language: Language) -> Result<StartResponse>;

    /// `POST /conversation/message`
    ///
    /// Returns [`crate::Error::SessionExpired`] when the backend no longer
    /// recognizes `session_id`.
    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        language: Language,
    ) -> Result<MessageResponse>;

    /// `POST /tts/speak`, returning encoded audio
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice: &VoiceOptions,
    ) -> Result<Vec<u8>>;

    /// `POST /stt/transcribe` with WAV audio
    async fn transcribe(&self, wav: Vec<u8>, language: Language) -> Result<String>;
}

/// Body of `POST /conversation/start`
#[derive(Debug, Serialize)]
pub struct StartRequest<'a> {
    pub user_id: &'a str,
    pub language: Language,
}

/// Reply of `POST /conversation/start`
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    #[serde(default)]
    pub greeting: String,
}

/// Body of `POST /conversation/message`
#[derive(Debug, Serialize)]
pub struct MessageRequest<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
    pub language: Language,
}

/// Triage block of a message reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriagePayload {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub red_flags: Option<Vec<String>>,
}

/// Mental-health block of a message reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MentalHealthPayload {
    #[serde(default)]
    pub crisis_detected: bool,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub concerns: Option<Vec<String>>,
}

/// Medication entries arrive either as bare names or as objects
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MedicationEntry {
    Name(String),
    Detailed(Medication),
}

impl From<MedicationEntry> for Medication {
    fn from(entry: MedicationEntry) -> Self {
        match entry {
            MedicationEntry::Name(name) => Self {
                name,
                dosage: None,
                notes: None,
            },
            MedicationEntry::Detailed(medication) => medication,
        }
    }
}

/// Reply of `POST /conversation/message`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    pub response: String,
    #[serde(default)]
    pub response_translated: Option<String>,
    #[serde(default)]
    pub symptoms_detected: Option<Vec<String>>,
    #[serde(default)]
    pub urgency_level: Option<String>,
    #[serde(default)]
    pub diagnoses: Option<Vec<Diagnosis>>,
    #[serde(default)]
    pub medications: Option<Vec<MedicationEntry>>,
    #[serde(default)]
    pub mental_health: Option<MentalHealthPayload>,
    #[serde(default)]
    pub triage: Option<TriagePayload>,
}

impl MessageResponse {
    /// Translated reply when the turn language calls for one and it exists
    #[must_use]
    pub fn translation_for(&self, language: Language) -> Option<&str> {
        if language.is_default() {
            return None;
        }
        self.response_translated
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Urgency classification of this reply
    ///
    /// The triage block's level wins over the flat `urgency_level`.
    #[must_use]
    pub fn classification(&self) -> Classification {
        let raw_level = self
            .triage
            .as_ref()
            .and_then(|t| t.level.as_deref())
            .or(self.urgency_level.as_deref());

        let level = raw_level.and_then(|raw| match raw.parse::<TriageLevel>() {
            Ok(level) => Some(level),
            Err(_) => {
                tracing::warn!(level = raw, "backend sent unknown urgency level");
                None
            }
        });

        let mental = self.mental_health.as_ref();
        Classification {
            level,
            crisis_detected: mental.is_some_and(|m| m.crisis_detected),
            crisis_severity: mental
                .and_then(|m| m.severity.as_deref())
                .map_or(CrisisSeverity::None, CrisisSeverity::parse_lenient),
            red_flags: self
                .triage
                .as_ref()
                .and_then(|t| t.red_flags.clone())
                .unwrap_or_default(),
        }
    }

    /// Medication suggestions of this reply
    #[must_use]
    pub fn medication_list(&self) -> Vec<Medication> {
        self.medications
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(Medication::from)
            .collect()
    }

    /// Clinical lists extracted in this reply
    #[must_use]
    pub fn extraction(&self) -> ClinicalState {
        ClinicalState {
            symptoms: self.symptoms_detected.clone().unwrap_or_default(),
            diagnoses: self.diagnoses.clone().unwrap_or_default(),
            medications: self.medication_list(),
        }
    }

    /// Mental-health flags worth attaching to the turn
    #[must_use]
    pub fn mental_health_flags(&self) -> Option<MentalHealthFlags> {
        let mental = self.mental_health.as_ref()?;
        let severity = mental
            .severity
            .as_deref()
            .map_or(CrisisSeverity::None, CrisisSeverity::parse_lenient);
        if !mental.crisis_detected && severity == CrisisSeverity::None {
            return None;
        }
        Some(MentalHealthFlags {
            crisis_detected: mental.crisis_detected,
            severity,
            concerns: mental.concerns.clone().unwrap_or_default(),
        })
    }
}

/// Voice parameters forwarded to `/tts/speak`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub rate: f32,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
        }
    }
}

/// Determine whether a failed backend reply says the session is gone
///
/// Matches a 404 mentioning the session, or an error body saying the session
/// was not found or expired.
#[must_use]
pub fn is_session_missing(status: u16, body: &str) -> bool {
    let lower = body.to_lowercase();
    if status == 404 && lower.contains("session") {
        return true;
    }

    serde_json::from_str::<serde_json::Value>(body).map_or_else(
        |_| mentions_missing_session(&lower),
        |value| error_says_session_missing(&value),
    )
}

/// Check the error fields of a JSON reply for a missing-session indicator
///
/// Used on successful replies too, where only the error fields count: the
/// assistant's own text may legitimately mention sessions.
#[must_use]
pub fn error_says_session_missing(value: &serde_json::Value) -> bool {
    ["error", "detail", "message"]
        .iter()
        .filter_map(|key| value.get(*key)?.as_str())
        .any(|text| mentions_missing_session(&text.to_lowercase()))
}

fn mentions_missing_session(lower: &str) -> bool {
    lower.contains("session not found")
        || lower.contains("session expired")
        || lower.contains("invalid session")
        || lower.contains("unknown session")
}
