//! Session persistence integration tests using an on-disk database

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use triage_console::db::{self, SnapshotRepo};
use triage_console::session::{
    ClinicalListPolicy, Diagnosis, Medication, MentalHealthFlags, Panel, SNAPSHOT_VERSION,
    Session, SessionStore, Snapshot, Turn, TurnKind, UiState, Vitals,
};
use triage_console::triage::{Classification, CrisisSeverity};
use triage_console::{Banner, ConversationBackend, Language, TriageLevel, TurnController};

mod common;
use common::MockBackend;

fn open_store(path: &std::path::Path) -> (Arc<SessionStore>, SnapshotRepo) {
    let pool = db::init(path).expect("failed to open test db");
    let repo = SnapshotRepo::new(pool);
    let store = Arc::new(SessionStore::init(
        Some(repo.clone()),
        "test-user",
        ClinicalListPolicy::Replace,
    ));
    (store, repo)
}

#[tokio::test]
async fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.db");

    let backend = MockBackend::new();
    backend.reply(
        r#"{"response": "Go to the nearest hospital.", "response_translated": "அருகிலுள்ள மருத்துவமனைக்குச் செல்லுங்கள்.",
            "urgency_level": "emergency", "symptoms_detected": ["chest pain"]}"#,
    );

    let before = {
        let (store, _) = open_store(&path);
        let dyn_backend: Arc<dyn ConversationBackend> = backend.clone();
        let controller = TurnController::new(Arc::clone(&store), dyn_backend);

        store.set_language(Language::Tamil);
        store.set_vitals(Vitals {
            temperature_c: Some(38.4),
            heart_rate_bpm: Some(112),
            ..Vitals::default()
        });
        store.toggle_panel(Panel::Symptoms);
        controller.submit("I have chest pain").await;
        store.snapshot()
    };

    let (restored, _) = open_store(&path);
    let after = restored.snapshot();
    assert_eq!(after, before);

    let session = after.session;
    assert_eq!(session.session_id(), Some("sess-1"));
    assert_eq!(session.current_language, Some(Language::Tamil));
    assert_eq!(session.triage_level(), Some(TriageLevel::Emergency));
    assert_eq!(session.triage.banners(), vec![Banner::Emergency]);
    assert_eq!(session.clinical.symptoms, vec!["chest pain"]);
    assert_eq!(session.vitals.unwrap().heart_rate_bpm, Some(112));
    assert!(after.ui.open_panels.contains(&Panel::Symptoms));
    assert!(session.pending_request.is_none());
}

#[test]
fn test_corrupt_record_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.db");

    {
        let (_, repo) = open_store(&path);
        repo.save_raw("{\"version\": 1, \"session\": [truncated").unwrap();
        assert!(repo.load().is_none());
    }

    let (store, _) = open_store(&path);
    let session = store.session();
    assert!(session.transcript.is_empty());
    assert_eq!(session.session_id(), None);
    assert_eq!(session.user_id, "test-user");
}

#[test]
fn test_clear_removes_persisted_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.db");

    let (store, repo) = open_store(&path);
    store.set_language(Language::Bengali);
    assert!(repo.load().is_some());

    store.clear();
    assert!(repo.load().is_none());

    let (reopened, _) = open_store(&path);
    assert_eq!(reopened.session().current_language, None);
}

const LEVELS: [TriageLevel; 5] = [
    TriageLevel::SelfCare,
    TriageLevel::Routine,
    TriageLevel::DoctorSoon,
    TriageLevel::Urgent,
    TriageLevel::Emergency,
];

const SEVERITIES: [CrisisSeverity; 5] = [
    CrisisSeverity::None,
    CrisisSeverity::Low,
    CrisisSeverity::Moderate,
    CrisisSeverity::High,
    CrisisSeverity::Critical,
];

const PANELS: [Panel; 5] = [
    Panel::Symptoms,
    Panel::Diagnoses,
    Panel::Medications,
    Panel::Vitals,
    Panel::Resources,
];

const WORDS: [&str; 8] = [
    "fever", "cough", "rash", "dizzy", "बुखार", "காய்ச்சல்", "nausea", "\"quoted\" pain",
];

fn phrase(rng: &mut StdRng) -> String {
    let words: Vec<&str> = (0..rng.gen_range(1..6))
        .map(|_| *WORDS.choose(rng).unwrap())
        .collect();
    words.join(" ")
}

fn maybe_phrase(rng: &mut StdRng) -> Option<String> {
    rng.gen_bool(0.5).then(|| phrase(rng))
}

fn classification(rng: &mut StdRng) -> Classification {
    let crisis_detected = rng.gen_bool(0.2);
    Classification {
        level: rng.gen_bool(0.8).then(|| *LEVELS.choose(rng).unwrap()),
        crisis_detected,
        crisis_severity: *SEVERITIES.choose(rng).unwrap(),
        red_flags: (0..rng.gen_range(0..3)).map(|_| phrase(rng)).collect(),
    }
}

fn medications(rng: &mut StdRng) -> Vec<Medication> {
    (0..rng.gen_range(0..4))
        .map(|_| Medication {
            name: phrase(rng),
            dosage: maybe_phrase(rng),
            notes: maybe_phrase(rng),
        })
        .collect()
}

fn random_snapshot(rng: &mut StdRng) -> Snapshot {
    let language = *Language::ALL.choose(rng).unwrap();
    let mut session = Session::new("test-user");
    session.current_language = rng.gen_bool(0.7).then_some(language);
    session.detected_language = rng.gen_bool(0.5).then(|| *Language::ALL.choose(rng).unwrap());
    session.last_language = rng.gen_bool(0.5).then_some(language);
    if rng.gen_bool(0.8) {
        session.assign_session_id(format!("sess-{}", rng.gen_range(1..1000)));
    }

    for _ in 0..rng.gen_range(0..12) {
        session.push_turn(Turn::user(phrase(rng), language));
        let turn = match rng.gen_range(0..4) {
            0 => Turn::notice(TurnKind::Cancelled, "Request cancelled.", language),
            1 => Turn::notice(TurnKind::NetworkFailure, phrase(rng), language),
            _ => {
                let triage = classification(rng);
                session.triage.observe(&triage);
                let flags = rng.gen_bool(0.3).then(|| MentalHealthFlags {
                    crisis_detected: triage.crisis_detected,
                    severity: triage.crisis_severity,
                    concerns: (0..rng.gen_range(0..3)).map(|_| phrase(rng)).collect(),
                });
                Turn::assistant(phrase(rng), language)
                    .with_translation(maybe_phrase(rng))
                    .with_triage(triage)
                    .with_medications(medications(rng))
                    .with_mental_health(flags)
            }
        };
        session.push_turn(turn);
    }

    session.clinical.symptoms = (0..rng.gen_range(0..5)).map(|_| phrase(rng)).collect();
    session.clinical.diagnoses = (0..rng.gen_range(0_u8..3))
        .map(|i: u8| Diagnosis {
            name: phrase(rng),
            confidence: rng.gen_bool(0.7).then_some(0.25 * f32::from(i + 1)),
            description: maybe_phrase(rng),
        })
        .collect();
    session.clinical.medications = medications(rng);
    if rng.gen_bool(0.5) {
        session.vitals = Some(Vitals {
            temperature_c: Some(36.5 + f32::from(rng.gen_range(0_u8..30)) / 10.0),
            heart_rate_bpm: Some(rng.gen_range(50..160)),
            ..Vitals::default()
        });
    }

    let mut ui = UiState::default();
    for panel in PANELS {
        if rng.gen_bool(0.4) {
            ui.open_panels.insert(panel);
        }
    }

    Snapshot {
        version: SNAPSHOT_VERSION,
        session,
        ui,
    }
}

#[test]
fn test_random_sessions_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let repo = SnapshotRepo::new(db::init(&dir.path().join("session.db")).unwrap());
    let mut rng = StdRng::seed_from_u64(0x7219_a6e5);
    let mut latched = false;

    for _ in 0..64 {
        let snapshot = random_snapshot(&mut rng);
        latched |= snapshot.session.triage.emergency_banner() || snapshot.session.crisis_active();

        repo.save(&snapshot).unwrap();
        assert_eq!(repo.load().as_ref(), Some(&snapshot));
    }

    // The seed must exercise the sticky banners
    assert!(latched);
}
