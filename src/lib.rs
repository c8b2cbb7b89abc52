//! Triage Console - conversational client for a multilingual symptom-triage service
//!
//! This library provides the session side of a triage consultation:
//! - Turn sequencing and cancellation against the diagnosis backend
//! - Per-turn language negotiation
//! - Urgency tracking with sticky emergency and crisis banners
//! - Exclusive voice capture and playback with a provider fallback chain
//! - Local persistence of the session across restarts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  View / CLI front end                │
//! └────────────┬───────────────────────────┬────────────┘
//!              │ submit / cancel           │ subscribe
//! ┌────────────▼────────────┐   ┌──────────▼────────────┐
//! │     TurnController      │──▶│     SessionStore      │──▶ SQLite
//! │  language negotiation   │   │  triage · clinical    │
//! └──────┬─────────────┬────┘   └───────────────────────┘
//!        │             │
//! ┌──────▼──────┐ ┌────▼─────────────────────────────────┐
//! │ HttpBackend │ │ AudioArbiter: mic · speakers · synth │
//! └─────────────┘ └──────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod language;
pub mod session;
pub mod triage;
pub mod turn;
pub mod voice;

pub use backend::{ConversationBackend, HttpBackend};
pub use config::Config;
pub use error::{Error, Result};
pub use language::Language;
pub use session::{Session, SessionStore, Turn};
pub use triage::{Banner, TriageLevel};
pub use turn::{TurnController, TurnOutcome};
pub use voice::{AudioArbiter, AudioState};
