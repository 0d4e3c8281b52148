use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use taskpilot_core_types::{UserId, WorkerId};

use crate::{
    api::WorkerRegistry,
    errors::RegistryError,
    metrics,
    model::{SessionStatus, WorkerSession},
};

/// In-memory registry of connected worker sessions, indexed by connection id and by owner.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<WorkerId, Arc<RwLock<WorkerSession>>>,
    by_user: DashMap<UserId, HashSet<WorkerId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Strict variant of [`WorkerRegistry::register`] that refuses to replace a live session.
    pub fn try_register(&self, session: WorkerSession) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&session.worker_id) {
            return Err(RegistryError::AlreadyRegistered(session.worker_id));
        }
        self.register(session);
        Ok(())
    }

    pub fn ensure_session(&self, worker: &WorkerId) -> Result<Arc<RwLock<WorkerSession>>, RegistryError> {
        self.sessions
            .get(worker)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::NotFound(worker.clone()))
    }

    pub fn sessions_for_user(&self, user: &UserId) -> Vec<WorkerSession> {
        let ids: Vec<WorkerId> = match self.by_user.get(user) {
            Some(set) => set.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.sessions.get(id).map(|entry| entry.read().clone()))
            .collect()
    }

    fn with_session<F>(&self, worker: &WorkerId, update: F) -> bool
    where
        F: FnOnce(&mut WorkerSession),
    {
        match self.ensure_session(worker) {
            Ok(session) => {
                update(&mut *session.write());
                true
            }
            Err(err) => {
                debug!(%worker, %err, "ignoring update for unknown session");
                false
            }
        }
    }

    fn unindex(&self, user: &UserId, worker: &WorkerId) {
        if let Some(mut set) = self.by_user.get_mut(user) {
            set.remove(worker);
        }
        self.by_user.remove_if(user, |_, set| set.is_empty());
    }
}

impl WorkerRegistry for SessionRegistry {
    fn register(&self, session: WorkerSession) -> Option<WorkerSession> {
        let worker = session.worker_id.clone();
        let user = session.user_id.clone();
        let previous = self
            .sessions
            .insert(worker.clone(), Arc::new(RwLock::new(session)))
            .map(|old| old.read().clone());
        if let Some(old) = &previous {
            if old.user_id != user {
                self.unindex(&old.user_id, &worker);
            }
        }
        self.by_user.entry(user.clone()).or_default().insert(worker.clone());
        metrics::record_registration();
        metrics::set_session_count(self.sessions.len());
        info!(%worker, %user, replaced = previous.is_some(), "worker session registered");
        previous
    }

    fn unregister(&self, worker: &WorkerId) -> Option<WorkerSession> {
        let (_, removed) = self.sessions.remove(worker)?;
        let mut session = removed.read().clone();
        self.unindex(&session.user_id, worker);
        session.status = SessionStatus::Disconnected;
        metrics::record_unregistration();
        metrics::set_session_count(self.sessions.len());
        info!(%worker, user = %session.user_id, "worker session unregistered");
        Some(session)
    }

    fn available_session(&self, user: &UserId, busy: &HashSet<WorkerId>) -> Option<WorkerSession> {
        self.sessions_for_user(user)
            .into_iter()
            .filter(|session| session.is_active() && !busy.contains(&session.worker_id))
            .max_by_key(|session| session.last_heartbeat)
    }

    fn session(&self, worker: &WorkerId) -> Option<WorkerSession> {
        self.sessions.get(worker).map(|entry| entry.read().clone())
    }

    fn update_heartbeat(&self, worker: &WorkerId, at: DateTime<Utc>) -> bool {
        self.with_session(worker, |session| {
            if at > session.last_heartbeat {
                session.last_heartbeat = at;
            }
            if at > session.last_activity {
                session.last_activity = at;
            }
        })
    }

    fn update_page_info(
        &self,
        worker: &WorkerId,
        url: Option<String>,
        title: Option<String>,
    ) -> bool {
        self.with_session(worker, |session| {
            if url.is_some() {
                session.current_url = url;
            }
            if title.is_some() {
                session.current_title = title;
            }
            session.last_activity = Utc::now();
        })
    }

    fn touch(&self, worker: &WorkerId) -> bool {
        self.with_session(worker, |session| session.last_activity = Utc::now())
    }

    fn set_status(&self, worker: &WorkerId, status: SessionStatus) -> bool {
        self.with_session(worker, |session| session.status = status)
    }

    fn sessions(&self) -> Vec<WorkerSession> {
        self.sessions
            .iter()
            .map(|entry| entry.value().read().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(worker: &str, user: &str) -> WorkerSession {
        WorkerSession::new(WorkerId::from(worker), UserId::from(user))
    }

    #[test]
    fn register_indexes_by_worker_and_user() {
        let registry = SessionRegistry::new();
        registry.register(session("w1", "alice"));
        registry.register(session("w2", "alice"));
        registry.register(session("w3", "bob"));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.sessions_for_user(&UserId::from("alice")).len(), 2);
        assert!(registry.session(&WorkerId::from("w3")).is_some());
    }

    #[test]
    fn unregister_twice_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.register(session("w1", "alice"));

        let removed = registry.unregister(&WorkerId::from("w1")).unwrap();
        assert_eq!(removed.status, SessionStatus::Disconnected);
        assert!(registry.unregister(&WorkerId::from("w1")).is_none());
        assert!(registry.unregister(&WorkerId::from("never")).is_none());
        assert!(registry.is_empty());
        assert!(registry.sessions_for_user(&UserId::from("alice")).is_empty());
    }

    #[test]
    fn available_session_prefers_freshest_heartbeat() {
        let registry = SessionRegistry::new();
        registry.register(session("old", "alice"));
        registry.register(session("fresh", "alice"));
        let later = Utc::now() + Duration::seconds(30);
        registry.update_heartbeat(&WorkerId::from("fresh"), later);

        let picked = registry
            .available_session(&UserId::from("alice"), &HashSet::new())
            .unwrap();
        assert_eq!(picked.worker_id, WorkerId::from("fresh"));
    }

    #[test]
    fn available_session_skips_busy_and_inactive() {
        let registry = SessionRegistry::new();
        registry.register(session("w1", "alice"));
        registry.register(session("w2", "alice"));
        registry.set_status(&WorkerId::from("w2"), SessionStatus::Disconnected);

        let mut busy = HashSet::new();
        assert_eq!(
            registry
                .available_session(&UserId::from("alice"), &busy)
                .map(|s| s.worker_id),
            Some(WorkerId::from("w1"))
        );
        busy.insert(WorkerId::from("w1"));
        assert!(registry.available_session(&UserId::from("alice"), &busy).is_none());
        assert!(registry.available_session(&UserId::from("carol"), &busy).is_none());
    }

    #[test]
    fn re_register_under_new_user_moves_index() {
        let registry = SessionRegistry::new();
        registry.register(session("w1", "anonymous"));
        let previous = registry.register(session("w1", "alice"));

        assert!(previous.is_some());
        assert!(registry.sessions_for_user(&UserId::anonymous()).is_empty());
        assert_eq!(registry.sessions_for_user(&UserId::from("alice")).len(), 1);
        assert!(registry.try_register(session("w1", "alice")).is_err());
    }

    #[test]
    fn page_info_updates_are_partial() {
        let registry = SessionRegistry::new();
        registry.register(session("w1", "alice"));
        let worker = WorkerId::from("w1");
        registry.update_page_info(&worker, Some("https://a.test".into()), Some("A".into()));
        registry.update_page_info(&worker, None, Some("B".into()));

        let snapshot = registry.session(&worker).unwrap();
        assert_eq!(snapshot.current_url.as_deref(), Some("https://a.test"));
        assert_eq!(snapshot.current_title.as_deref(), Some("B"));
        assert!(!registry.update_heartbeat(&WorkerId::from("missing"), Utc::now()));
    }
}
