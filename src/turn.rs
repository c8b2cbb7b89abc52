//! Turn controller
//!
//! Sequences conversation turns with the backend. Each submit supersedes
//! the previous request; a response is applied only if its request is
//! still the live one when it arrives. Failures become transcript turns
//! and never propagate to the caller.

use std::sync::Arc;

use crate::backend::{ConversationBackend, MessageResponse};
use crate::language::{Language, negotiate};
use crate::session::{
    ClinicalListPolicy, RequestHandle, Session, SessionStore, Turn, TurnKind,
};
use crate::voice::AudioArbiter;
use crate::{Error, Result};

/// Shown when the backend dropped the session
const SESSION_EXPIRED_NOTICE: &str =
    "Your consultation session has expired. Please start a new consultation.";

/// Shown when the backend could not be reached
const NETWORK_FAILURE_NOTICE: &str =
    "Sorry, I could not reach the triage service. Please check your connection and try again.";

/// Shown after the user cancels
const CANCELLED_NOTICE: &str = "Request cancelled.";

/// How a submitted turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The backend answered and the reply was appended
    Answered(Turn),
    /// Cancelled or superseded before the reply arrived
    Discarded,
    /// The request failed; an error turn was appended
    Failed { kind: TurnKind, turn: Turn },
}

/// Drives conversation turns against the backend
pub struct TurnController {
    store: Arc<SessionStore>,
    backend: Arc<dyn ConversationBackend>,
    audio: Option<Arc<AudioArbiter>>,
    auto_speak: bool,
}

impl TurnController {
    /// Create a controller without audio
    #[must_use]
    pub fn new(store: Arc<SessionStore>, backend: Arc<dyn ConversationBackend>) -> Self {
        Self {
            store,
            backend,
            audio: None,
            auto_speak: false,
        }
    }

    /// Attach the audio arbiter, optionally speaking every reply
    #[must_use]
    pub fn with_audio(mut self, audio: Arc<AudioArbiter>, auto_speak: bool) -> Self {
        self.audio = Some(audio);
        self.auto_speak = auto_speak;
        self
    }

    /// The store this controller writes to
    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The audio arbiter, if voice is attached
    #[must_use]
    pub const fn audio(&self) -> Option<&Arc<AudioArbiter>> {
        self.audio.as_ref()
    }

    /// Start a backend consultation and append its greeting
    ///
    /// Returns `None` if a consultation is already running or the backend
    /// sent no greeting.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot start a session
    pub async fn start_consultation(&self) -> Result<Option<Turn>> {
        let (user_id, language, existing) = self.store.read(|s| {
            (
                s.user_id.clone(),
                s.effective_language(),
                s.session_id().is_some(),
            )
        });
        if existing {
            return Ok(None);
        }

        let started = self.backend.start_session(&user_id, language).await?;
        let greeting = started.greeting.trim().to_string();

        Ok(self.store.update(|session| {
            if !session.assign_session_id(started.session_id) {
                // A concurrent start won
                return None;
            }
            if greeting.is_empty() {
                return None;
            }
            let turn = Turn::assistant(greeting, language);
            session.push_turn(turn.clone());
            Some(turn)
        }))
    }

    /// Submit user input as a new turn
    ///
    /// Supersedes any request still in flight. Starts a consultation first
    /// if none is running.
    pub async fn submit(&self, text: &str) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Discarded;
        }

        let language = self.store.update(|session| {
            let negotiation = negotiate(text, session.current_language, session.last_language);
            session.detected_language = negotiation.detected;
            if negotiation.adopt {
                tracing::info!(language = %negotiation.language, "adopting detected language");
                session.current_language = Some(negotiation.language);
            }
            negotiation.language
        });

        let (handle, _superseded) = self.store.begin_request(language);
        self.store
            .update(|session| session.push_turn(Turn::user(text, language)));
        tracing::debug!(generation = handle.generation, language = %language, "turn submitted");

        let result = self.exchange(text, language).await;
        self.settle(&handle, result)
    }

    /// Cancel the in-flight request, if any
    ///
    /// Its reply will be dropped when it arrives. Stops any playback.
    /// Returns whether a request was cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.store.cancel_request(|session| {
            let language = session.effective_language();
            session.push_turn(Turn::notice(TurnKind::Cancelled, CANCELLED_NOTICE, language));
        });

        if let Some(audio) = &self.audio {
            audio.stop();
        }

        match cancelled {
            Some(handle) => {
                tracing::info!(generation = handle.generation, "request cancelled");
                true
            }
            None => false,
        }
    }

    /// Talk to the backend, starting a session on the way if needed
    async fn exchange(&self, text: &str, language: Language) -> Result<MessageResponse> {
        let session_id = match self.store.read(|s| s.session_id().map(str::to_string)) {
            Some(id) => id,
            None => {
                let user_id = self.store.read(|s| s.user_id.clone());
                let started = self.backend.start_session(&user_id, language).await?;
                // A concurrent submit may have started one first; keep it
                self.store.update(|session| {
                    session.assign_session_id(started.session_id);
                    session.session_id().map(str::to_string).unwrap_or_default()
                })
            }
        };

        self.backend.send_message(&session_id, text, language).await
    }

    /// Apply the result of an exchange if its request is still live
    fn settle(&self, handle: &RequestHandle, result: Result<MessageResponse>) -> TurnOutcome {
        let policy = self.store.clinical_policy();
        let outcome = self.store.complete_request(handle, |session| match result {
            Ok(reply) => TurnOutcome::Answered(apply_reply(session, &reply, handle.language, policy)),
            Err(error) => record_failure(session, &error, handle.language),
        });

        match outcome {
            Some(TurnOutcome::Answered(turn)) => {
                self.speak_reply(&turn);
                TurnOutcome::Answered(turn)
            }
            Some(outcome) => outcome,
            None => TurnOutcome::Discarded,
        }
    }

    fn speak_reply(&self, turn: &Turn) {
        if !self.auto_speak {
            return;
        }
        let Some(audio) = self.audio.clone() else {
            return;
        };

        let text = turn.display_text().to_string();
        let language = turn.language;
        tokio::spawn(async move {
            if let Err(e) = audio.speak(&text, language).await {
                tracing::debug!(error = %e, "reply not spoken");
            }
        });
    }
}

/// Fold a backend reply into the session and append the assistant turn
fn apply_reply(
    session: &mut Session,
    reply: &MessageResponse,
    language: Language,
    policy: ClinicalListPolicy,
) -> Turn {
    let classification = reply.classification();
    session.triage.observe(&classification);
    session.clinical.absorb(reply.extraction(), policy);
    session.last_language = Some(language);

    let turn = Turn::assistant(reply.response.clone(), language)
        .with_translation(reply.translation_for(language).map(str::to_string))
        .with_triage(classification)
        .with_medications(reply.medication_list())
        .with_mental_health(reply.mental_health_flags());

    tracing::debug!(
        level = ?session.triage_level(),
        banners = ?session.triage.banners(),
        "reply applied"
    );
    session.push_turn(turn.clone());
    turn
}

/// Turn a failed exchange into an error turn
fn record_failure(session: &mut Session, error: &Error, language: Language) -> TurnOutcome {
    let (kind, text) = match error {
        Error::SessionExpired => {
            let dropped = session.invalidate_session_id();
            tracing::warn!(session_id = ?dropped, "backend dropped the session");
            (TurnKind::SessionExpired, SESSION_EXPIRED_NOTICE)
        }
        other => {
            tracing::warn!(error = %other, "turn failed");
            (TurnKind::NetworkFailure, NETWORK_FAILURE_NOTICE)
        }
    };

    let turn = Turn::notice(kind, text, language);
    session.push_turn(turn.clone());
    TurnOutcome::Failed { kind, turn }
}
