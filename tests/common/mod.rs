//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use triage_console::backend::{MessageResponse, StartResponse, VoiceOptions};
use triage_console::session::{ClinicalListPolicy, SessionStore};
use triage_console::{ConversationBackend, Error, Language, Result, TurnController};

/// Greeting returned by every mock session start
pub const GREETING: &str = "Hello, I am here to help. What symptoms do you have?";

/// Parse a message reply from JSON
#[must_use]
pub fn response(json: &str) -> MessageResponse {
    serde_json::from_str(json).expect("valid mock response")
}

enum Scripted {
    Ready(Result<MessageResponse>),
    Gated(oneshot::Receiver<Result<MessageResponse>>),
}

/// Test side of a gated reply: the backend call blocks until released
pub struct Gate {
    tx: oneshot::Sender<Result<MessageResponse>>,
}

impl Gate {
    /// Deliver a successful reply
    pub fn release(self, json: &str) {
        let _ = self.tx.send(Ok(response(json)));
    }

    /// Deliver an error
    pub fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}

/// A message the mock received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub session_id: String,
    pub message: String,
    pub language: Language,
}

/// Scripted backend: replies are handed out in call order
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<VecDeque<Scripted>>,
    sent: Mutex<Vec<SentMessage>>,
    starts: AtomicUsize,
    synth_fails: AtomicBool,
    synthesized: AtomicUsize,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue an immediate reply
    pub fn reply(&self, json: &str) {
        self.push(Scripted::Ready(Ok(response(json))));
    }

    /// Queue an immediate error
    pub fn fail(&self, error: Error) {
        self.push(Scripted::Ready(Err(error)));
    }

    /// Queue a reply the test releases later
    #[must_use]
    pub fn gate(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.push(Scripted::Gated(rx));
        Gate { tx }
    }

    /// Make `/tts/speak` fail
    pub fn fail_synthesis(&self, fail: bool) {
        self.synth_fails.store(fail, Ordering::SeqCst);
    }

    /// Messages received so far
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of sessions started
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of successful synthesis calls
    #[must_use]
    pub fn synthesized(&self) -> usize {
        self.synthesized.load(Ordering::SeqCst)
    }

    /// Wait until `count` messages have reached the backend
    pub async fn wait_for_messages(&self, count: usize) {
        for _ in 0..200 {
            if self.sent.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("backend never received {count} messages");
    }

    fn push(&self, scripted: Scripted) {
        self.script.lock().unwrap().push_back(scripted);
    }
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn start_session(&self, _user_id: &str, _language: Language) -> Result<StartResponse> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StartResponse {
            session_id: format!("sess-{n}"),
            greeting: GREETING.to_string(),
        })
    }

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        language: Language,
    ) -> Result<MessageResponse> {
        self.sent.lock().unwrap().push(SentMessage {
            session_id: session_id.to_string(),
            message: message.to_string(),
            language,
        });

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Gated(rx)) => rx.await.unwrap_or_else(|_| {
                Err(Error::Backend {
                    status: 500,
                    body: "gate dropped".to_string(),
                })
            }),
            None => Err(Error::Backend {
                status: 500,
                body: "no scripted reply".to_string(),
            }),
        }
    }

    async fn synthesize(
        &self,
        _text: &str,
        _language: Language,
        _voice: &VoiceOptions,
    ) -> Result<Vec<u8>> {
        if self.synth_fails.load(Ordering::SeqCst) {
            return Err(Error::Backend {
                status: 503,
                body: "tts unavailable".to_string(),
            });
        }
        self.synthesized.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0xff, 0xfb, 0x90, 0x00])
    }

    async fn transcribe(&self, _wav: Vec<u8>, _language: Language) -> Result<String> {
        Ok("transcribed speech".to_string())
    }
}

/// In-memory store for one test user
#[must_use]
pub fn test_store(policy: ClinicalListPolicy) -> Arc<SessionStore> {
    Arc::new(SessionStore::ephemeral("test-user", policy))
}

/// Controller wired to a mock backend
#[must_use]
pub fn test_controller(backend: &Arc<MockBackend>) -> Arc<TurnController> {
    let backend: Arc<dyn ConversationBackend> = backend.clone();
    Arc::new(TurnController::new(
        test_store(ClinicalListPolicy::Replace),
        backend,
    ))
}
