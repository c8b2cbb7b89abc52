//! Conversation session model
//!
//! The [`Session`] is the single source of truth for one consultation. It is
//! owned by the [`SessionStore`], which is the only way to mutate it.

mod store;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::language::Language;
use crate::triage::{Classification, TriageLevel, TriageTracker};

pub use store::{SessionStore, SNAPSHOT_VERSION};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// What a turn represents in the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Ordinary conversational message
    Message,
    /// The user cancelled the in-flight request
    Cancelled,
    /// The backend could not be reached
    NetworkFailure,
    /// The backend no longer knows this session
    SessionExpired,
}

/// Mental-health flags reported with an assistant turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentalHealthFlags {
    pub crisis_detected: bool,
    pub severity: crate::triage::CrisisSeverity,
    #[serde(default)]
    pub concerns: Vec<String>,
}

/// One message in the transcript; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub kind: TurnKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_snapshot: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medications: Option<Vec<Medication>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mental_health_flags: Option<MentalHealthFlags>,
}

impl Turn {
    fn new(role: Role, kind: TurnKind, text: impl Into<String>, language: Language) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            kind,
            text: text.into(),
            translated_text: None,
            language,
            timestamp: Utc::now(),
            triage_snapshot: None,
            medications: None,
            mental_health_flags: None,
        }
    }

    /// A message typed or spoken by the user
    #[must_use]
    pub fn user(text: impl Into<String>, language: Language) -> Self {
        Self::new(Role::User, TurnKind::Message, text, language)
    }

    /// An ordinary assistant reply
    #[must_use]
    pub fn assistant(text: impl Into<String>, language: Language) -> Self {
        Self::new(Role::Assistant, TurnKind::Message, text, language)
    }

    /// An informational or error turn produced locally
    #[must_use]
    pub fn notice(kind: TurnKind, text: impl Into<String>, language: Language) -> Self {
        Self::new(Role::Assistant, kind, text, language)
    }

    /// Attach the translation shown in place of `text`
    #[must_use]
    pub fn with_translation(mut self, translated: Option<String>) -> Self {
        self.translated_text = translated;
        self
    }

    /// Text to show and speak: the translation when there is one
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.translated_text.as_deref().unwrap_or(&self.text)
    }

    /// Attach the classification this turn was given
    #[must_use]
    pub fn with_triage(mut self, classification: Classification) -> Self {
        self.triage_snapshot = Some(classification);
        self
    }

    /// Attach medication suggestions
    #[must_use]
    pub fn with_medications(mut self, medications: Vec<Medication>) -> Self {
        if !medications.is_empty() {
            self.medications = Some(medications);
        }
        self
    }

    /// Attach mental-health flags
    #[must_use]
    pub fn with_mental_health(mut self, flags: Option<MentalHealthFlags>) -> Self {
        self.mental_health_flags = flags;
        self
    }
}

/// A ranked candidate condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    #[serde(alias = "condition", alias = "disease")]
    pub name: String,
    #[serde(default, alias = "probability", alias = "score")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A suggested medication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Vital signs the user reported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub temperature_c: Option<f32>,
    pub heart_rate_bpm: Option<u16>,
    pub spo2_percent: Option<u8>,
    pub systolic_mmhg: Option<u16>,
    pub diastolic_mmhg: Option<u16>,
}

/// How extracted clinical lists evolve across turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClinicalListPolicy {
    /// Each turn's lists replace the previous ones
    #[default]
    Replace,
    /// Lists are unioned by name across turns
    Accumulate,
}

impl std::str::FromStr for ClinicalListPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "accumulate" => Ok(Self::Accumulate),
            other => Err(crate::Error::Config(format!(
                "unknown clinical list policy: {other}"
            ))),
        }
    }
}

/// Symptoms, diagnoses and medications extracted from the conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalState {
    pub symptoms: Vec<String>,
    pub diagnoses: Vec<Diagnosis>,
    pub medications: Vec<Medication>,
}

impl ClinicalState {
    /// Fold one turn's extraction into the current lists
    pub fn absorb(&mut self, update: Self, policy: ClinicalListPolicy) {
        match policy {
            ClinicalListPolicy::Replace => {
                self.symptoms = dedup_by(update.symptoms, |s| s.to_lowercase());
                self.diagnoses = update.diagnoses;
                self.medications = dedup_by(update.medications, |m| m.name.to_lowercase());
            }
            ClinicalListPolicy::Accumulate => {
                let symptoms = std::mem::take(&mut self.symptoms);
                self.symptoms = dedup_by(symptoms.into_iter().chain(update.symptoms), |s| {
                    s.to_lowercase()
                });

                // Latest ranking first so a re-scored condition keeps its new confidence
                let diagnoses = std::mem::take(&mut self.diagnoses);
                self.diagnoses = dedup_by(update.diagnoses.into_iter().chain(diagnoses), |d| {
                    d.name.to_lowercase()
                });

                let medications = std::mem::take(&mut self.medications);
                self.medications = dedup_by(medications.into_iter().chain(update.medications), |m| {
                    m.name.to_lowercase()
                });
            }
        }
    }
}

fn dedup_by<T, K: Ord>(items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut seen = BTreeSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Handle of the single in-flight backend request
///
/// Owned by the turn controller; a response is applied only while the
/// store's generation still equals `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandle {
    pub generation: u64,
    pub language: Language,
}

/// One consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    session_id: Option<String>,
    pub user_id: String,
    pub transcript: Vec<Turn>,
    /// Standing language selection, `None` until the user picks one
    pub current_language: Option<Language>,
    /// Language detected from the latest input
    pub detected_language: Option<Language>,
    /// Language of the most recent completed exchange
    pub last_language: Option<Language>,
    pub triage: TriageTracker,
    pub clinical: ClinicalState,
    #[serde(default)]
    pub vitals: Option<Vitals>,
    #[serde(skip)]
    pub pending_request: Option<RequestHandle>,
}

impl Session {
    /// Create an empty session for a user
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            session_id: None,
            user_id: user_id.into(),
            transcript: Vec::new(),
            current_language: None,
            detected_language: None,
            last_language: None,
            triage: TriageTracker::new(),
            clinical: ClinicalState::default(),
            vitals: None,
            pending_request: None,
        }
    }

    /// Backend-assigned session id
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Assign the backend session id
    ///
    /// Returns `false` and leaves the id untouched if one is already set.
    pub fn assign_session_id(&mut self, id: impl Into<String>) -> bool {
        if self.session_id.is_some() {
            return false;
        }
        self.session_id = Some(id.into());
        true
    }

    /// Forget the backend session id after the backend dropped it
    pub fn invalidate_session_id(&mut self) -> Option<String> {
        self.session_id.take()
    }

    /// Append a turn to the transcript
    pub fn push_turn(&mut self, turn: Turn) {
        self.transcript.push(turn);
    }

    /// Current urgency level
    #[must_use]
    pub const fn triage_level(&self) -> Option<TriageLevel> {
        self.triage.current_level()
    }

    /// Whether the crisis banner is active
    #[must_use]
    pub const fn crisis_active(&self) -> bool {
        self.triage.crisis_active()
    }

    /// Language to fall back on when nothing else is known
    #[must_use]
    pub fn effective_language(&self) -> Language {
        self.current_language
            .or(self.last_language)
            .unwrap_or_default()
    }
}

/// Collapsible panels of the view layer that survive reloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Symptoms,
    Diagnoses,
    Medications,
    Vitals,
    Resources,
}

/// UI-adjacent state persisted with the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    pub open_panels: BTreeSet<Panel>,
}

/// Everything persisted for one installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub session: Session,
    #[serde(default)]
    pub ui: UiState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnosis(name: &str, confidence: f32) -> Diagnosis {
        Diagnosis {
            name: name.to_string(),
            confidence: Some(confidence),
            description: None,
        }
    }

    fn extraction(symptoms: &[&str], diagnoses: Vec<Diagnosis>) -> ClinicalState {
        ClinicalState {
            symptoms: symptoms.iter().map(ToString::to_string).collect(),
            diagnoses,
            medications: vec![],
        }
    }

    #[test]
    fn session_id_is_immutable_once_set() {
        let mut session = Session::new("u1");
        assert!(session.assign_session_id("s1"));
        assert!(!session.assign_session_id("s2"));
        assert_eq!(session.session_id(), Some("s1"));

        assert_eq!(session.invalidate_session_id().as_deref(), Some("s1"));
        assert!(session.assign_session_id("s3"));
    }

    #[test]
    fn replace_policy_keeps_latest_turn_only() {
        let mut clinical = ClinicalState::default();
        clinical.absorb(
            extraction(&["fever", "headache"], vec![diagnosis("flu", 0.6)]),
            ClinicalListPolicy::Replace,
        );
        clinical.absorb(
            extraction(&["cough"], vec![diagnosis("bronchitis", 0.4)]),
            ClinicalListPolicy::Replace,
        );
        assert_eq!(clinical.symptoms, vec!["cough"]);
        assert_eq!(clinical.diagnoses.len(), 1);
        assert_eq!(clinical.diagnoses[0].name, "bronchitis");
    }

    #[test]
    fn accumulate_policy_unions_by_name() {
        let mut clinical = ClinicalState::default();
        clinical.absorb(
            extraction(&["fever", "headache"], vec![diagnosis("flu", 0.6)]),
            ClinicalListPolicy::Accumulate,
        );
        clinical.absorb(
            extraction(&["Fever", "cough"], vec![diagnosis("Flu", 0.8)]),
            ClinicalListPolicy::Accumulate,
        );
        assert_eq!(clinical.symptoms, vec!["fever", "headache", "cough"]);
        assert_eq!(clinical.diagnoses.len(), 1);
        assert_eq!(clinical.diagnoses[0].confidence, Some(0.8));
    }

    #[test]
    fn pending_request_is_not_persisted() {
        let mut session = Session::new("u1");
        session.pending_request = Some(RequestHandle {
            generation: 3,
            language: Language::Hindi,
        });
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert!(back.pending_request.is_none());
    }

    #[test]
    fn diagnosis_accepts_backend_aliases() {
        let d: Diagnosis =
            serde_json::from_str(r#"{"condition": "Migraine", "probability": 0.7}"#).unwrap();
        assert_eq!(d.name, "Migraine");
        assert_eq!(d.confidence, Some(0.7));
    }
}
