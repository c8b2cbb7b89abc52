//! Session store: owned session state, request generations and persistence

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::{ClinicalListPolicy, Panel, RequestHandle, Session, Snapshot, UiState, Vitals};
use crate::db::SnapshotRepo;
use crate::language::Language;
use crate::triage::Banner;

/// Version stamped into every persisted snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

struct Inner {
    snapshot: Snapshot,
    /// Bumped on every begin, cancel and clear; responses carrying an older
    /// value are dropped
    generation: u64,
}

/// Single source of truth for the running consultation
///
/// Every mutation goes through the store so it can publish the new snapshot
/// to subscribers and write it to the local persistence store.
pub struct SessionStore {
    inner: Mutex<Inner>,
    updates: watch::Sender<Snapshot>,
    repo: Option<SnapshotRepo>,
    policy: ClinicalListPolicy,
}

impl SessionStore {
    /// Open the store, restoring the persisted snapshot if there is a usable one
    #[must_use]
    pub fn init(repo: Option<SnapshotRepo>, user_id: &str, policy: ClinicalListPolicy) -> Self {
        let restored = repo.as_ref().and_then(SnapshotRepo::load).filter(|snapshot| {
            let same_user = snapshot.session.user_id == user_id;
            if !same_user {
                tracing::info!("stored session belongs to another user, starting fresh");
            }
            same_user
        });

        let snapshot = restored.map_or_else(
            || fresh_snapshot(user_id),
            |snapshot| {
                tracing::info!(
                    session_id = ?snapshot.session.session_id(),
                    turns = snapshot.session.transcript.len(),
                    "restored session"
                );
                snapshot
            },
        );

        let (updates, _) = watch::channel(snapshot.clone());
        Self {
            inner: Mutex::new(Inner {
                snapshot,
                generation: 0,
            }),
            updates,
            repo,
            policy,
        }
    }

    /// In-memory store without persistence
    #[must_use]
    pub fn ephemeral(user_id: &str, policy: ClinicalListPolicy) -> Self {
        Self::init(None, user_id, policy)
    }

    /// Policy applied to extracted clinical lists
    #[must_use]
    pub const fn clinical_policy(&self) -> ClinicalListPolicy {
        self.policy
    }

    /// Copy of the current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    /// Copy of the current session
    #[must_use]
    pub fn session(&self) -> Session {
        self.lock().snapshot.session.clone()
    }

    /// Subscribe to every published snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    /// Read the session without mutating it
    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.lock().snapshot.session)
    }

    /// Mutate the session, then publish and persist the result
    pub fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut inner.snapshot.session);
        self.commit(&inner.snapshot);
        result
    }

    /// Register a new in-flight request, superseding any previous one
    ///
    /// Returns the new handle and the handle it replaced, if any.
    pub fn begin_request(&self, language: Language) -> (RequestHandle, Option<RequestHandle>) {
        let mut inner = self.lock();
        inner.generation += 1;
        let handle = RequestHandle {
            generation: inner.generation,
            language,
        };
        let superseded = inner.snapshot.session.pending_request.replace(handle);
        if let Some(old) = superseded {
            tracing::debug!(
                old = old.generation,
                new = handle.generation,
                "superseding in-flight request"
            );
        }
        self.commit(&inner.snapshot);
        (handle, superseded)
    }

    /// Whether `handle` is still the live request
    #[must_use]
    pub fn is_current(&self, handle: &RequestHandle) -> bool {
        let inner = self.lock();
        inner.generation == handle.generation
            && inner.snapshot.session.pending_request == Some(*handle)
    }

    /// Apply a response if its request is still the live one
    ///
    /// The generation check and the mutation happen under one lock, so a
    /// cancelled or superseded response can never touch the session.
    pub fn complete_request<R>(
        &self,
        handle: &RequestHandle,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut inner = self.lock();
        if inner.generation != handle.generation
            || inner.snapshot.session.pending_request != Some(*handle)
        {
            tracing::debug!(
                generation = handle.generation,
                current = inner.generation,
                "dropping stale response"
            );
            return None;
        }

        inner.snapshot.session.pending_request = None;
        let result = f(&mut inner.snapshot.session);
        self.commit(&inner.snapshot);
        Some(result)
    }

    /// Invalidate the in-flight request, returning its handle
    ///
    /// `f` runs under the same lock only when a request was cancelled.
    pub fn cancel_request(&self, f: impl FnOnce(&mut Session)) -> Option<RequestHandle> {
        let mut inner = self.lock();
        let cancelled = inner.snapshot.session.pending_request.take()?;
        inner.generation += 1;
        f(&mut inner.snapshot.session);
        self.commit(&inner.snapshot);
        Some(cancelled)
    }

    /// Explicit language selection
    pub fn set_language(&self, language: Language) {
        self.update(|session| session.current_language = Some(language));
    }

    /// Record reported vitals
    pub fn set_vitals(&self, vitals: Vitals) {
        self.update(|session| session.vitals = Some(vitals));
    }

    /// Open or close a panel, returning whether it is now open
    pub fn toggle_panel(&self, panel: Panel) -> bool {
        let mut inner = self.lock();
        let panels = &mut inner.snapshot.ui.open_panels;
        let open = if panels.remove(&panel) {
            false
        } else {
            panels.insert(panel);
            true
        };
        self.commit(&inner.snapshot);
        open
    }

    /// Dismiss the top visible banner
    pub fn dismiss_banner(&self) -> Option<Banner> {
        self.update(|session| session.triage.dismiss_top())
    }

    /// Dismiss the support panel only
    pub fn dismiss_support_panel(&self) {
        self.update(|session| session.triage.dismiss_support_panel());
    }

    /// Wipe the session and its persisted record
    ///
    /// Any in-flight request is invalidated along with it.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        let user_id = inner.snapshot.session.user_id.clone();
        inner.snapshot = fresh_snapshot(&user_id);

        if let Some(repo) = &self.repo {
            if let Err(e) = repo.clear() {
                tracing::warn!(error = %e, "failed to clear persisted session");
            }
        }
        self.updates.send_replace(inner.snapshot.clone());
        tracing::info!("session cleared");
    }

    fn commit(&self, snapshot: &Snapshot) {
        self.updates.send_replace(snapshot.clone());
        if let Some(repo) = &self.repo {
            if let Err(e) = repo.save(snapshot) {
                tracing::warn!(error = %e, "failed to persist session snapshot");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fresh_snapshot(user_id: &str) -> Snapshot {
    Snapshot {
        version: SNAPSHOT_VERSION,
        session: Session::new(user_id),
        ui: UiState::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Turn;

    fn store() -> SessionStore {
        SessionStore::ephemeral("user-1", ClinicalListPolicy::Replace)
    }

    #[test]
    fn newer_request_supersedes_older() {
        let store = store();
        let (first, _) = store.begin_request(Language::English);
        let (second, superseded) = store.begin_request(Language::English);
        assert_eq!(superseded, Some(first));

        assert!(store.complete_request(&first, |_| ()).is_none());
        assert!(store.complete_request(&second, |_| ()).is_some());
        assert!(store.session().pending_request.is_none());
    }

    #[test]
    fn cancelled_request_cannot_complete() {
        let store = store();
        let (handle, _) = store.begin_request(Language::Hindi);
        assert_eq!(store.cancel_request(|_| ()), Some(handle));
        assert!(!store.is_current(&handle));
        assert!(store.complete_request(&handle, |_| ()).is_none());
    }

    #[test]
    fn cancel_without_request_is_noop() {
        let store = store();
        let mut ran = false;
        assert!(store.cancel_request(|_| ran = true).is_none());
        assert!(!ran);
    }

    #[test]
    fn subscribers_see_updates() {
        let store = store();
        let mut rx = store.subscribe();
        store.update(|s| s.push_turn(Turn::user("hello", Language::English)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().session.transcript.len(), 1);
    }

    #[test]
    fn restores_persisted_snapshot() {
        let pool = crate::db::init_memory().unwrap();
        let first = SessionStore::init(
            Some(SnapshotRepo::new(pool.clone())),
            "user-1",
            ClinicalListPolicy::Replace,
        );
        first.update(|s| {
            s.assign_session_id("sess-1");
            s.push_turn(Turn::user("hi", Language::English));
        });
        first.toggle_panel(Panel::Medications);

        let second = SessionStore::init(
            Some(SnapshotRepo::new(pool)),
            "user-1",
            ClinicalListPolicy::Replace,
        );
        let snapshot = second.snapshot();
        assert_eq!(snapshot.session.session_id(), Some("sess-1"));
        assert!(snapshot.ui.open_panels.contains(&Panel::Medications));
    }

    #[test]
    fn other_users_snapshot_is_ignored() {
        let pool = crate::db::init_memory().unwrap();
        let first = SessionStore::init(
            Some(SnapshotRepo::new(pool.clone())),
            "user-1",
            ClinicalListPolicy::Replace,
        );
        first.update(|s| s.push_turn(Turn::user("hi", Language::English)));

        let second = SessionStore::init(
            Some(SnapshotRepo::new(pool)),
            "user-2",
            ClinicalListPolicy::Replace,
        );
        assert!(second.session().transcript.is_empty());
    }

    #[test]
    fn clear_resets_and_invalidates() {
        let pool = crate::db::init_memory().unwrap();
        let repo = SnapshotRepo::new(pool);
        let store = SessionStore::init(Some(repo.clone()), "user-1", ClinicalListPolicy::Replace);
        let (handle, _) = store.begin_request(Language::English);
        store.update(|s| s.push_turn(Turn::user("hi", Language::English)));

        store.clear();
        assert!(store.session().transcript.is_empty());
        assert!(store.complete_request(&handle, |_| ()).is_none());
        assert!(repo.load().is_none());
    }

    #[test]
    fn toggle_panel_flips_state() {
        let store = store();
        assert!(store.toggle_panel(Panel::Vitals));
        assert!(!store.toggle_panel(Panel::Vitals));
    }
}
