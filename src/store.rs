use std::collections::{BTreeMap, HashMap};

use crate::best_efforts::{BestEffortRepository, RecalculationToken};
use crate::duplicates::DuplicateKey;
use crate::error::{Result, StrideError};
use crate::models::{BestEffortRecord, Session};

/// Persistence boundary for sessions
pub trait SessionStore {
    /// Insert or replace one session
    fn save_session(&mut self, session: &Session) -> Result<()>;

    /// Insert or replace many sessions as one unit: all or none are written
    fn save_sessions(&mut self, sessions: &[Session]) -> Result<()>;

    fn load_session(&self, id: &str) -> Result<Option<Session>>;

    /// Ids of all stored sessions, oldest start first
    fn session_ids(&self) -> Result<Vec<String>>;

    /// Comparison keys of all stored sessions
    fn duplicate_keys(&self) -> Result<Vec<DuplicateKey>>;

    /// Remove a session; returns whether it existed
    fn delete_session(&mut self, id: &str) -> Result<bool>;
}

/// In-process store for tests and embedding callers
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    sessions: HashMap<String, Session>,
    best_efforts: BTreeMap<String, BestEffortRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn save_session(&mut self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn save_sessions(&mut self, sessions: &[Session]) -> Result<()> {
        for session in sessions {
            self.sessions.insert(session.id.clone(), session.clone());
        }
        Ok(())
    }

    fn load_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).cloned())
    }

    fn session_ids(&self) -> Result<Vec<String>> {
        let mut keyed: Vec<(&String, &Session)> = self.sessions.iter().collect();
        keyed.sort_by(|a, b| {
            a.1.stats
                .started_at
                .cmp(&b.1.stats.started_at)
                .then_with(|| a.0.cmp(b.0))
        });
        Ok(keyed.into_iter().map(|(id, _)| id.clone()).collect())
    }

    fn duplicate_keys(&self) -> Result<Vec<DuplicateKey>> {
        Ok(self.sessions.values().map(DuplicateKey::from_session).collect())
    }

    fn delete_session(&mut self, id: &str) -> Result<bool> {
        Ok(self.sessions.remove(id).is_some())
    }
}

impl BestEffortRepository for MemoryStore {
    fn get(&self, label: &str) -> Result<Option<BestEffortRecord>> {
        BestEffortRepository::get(&self.best_efforts, label)
    }

    fn upsert(&mut self, record: BestEffortRecord) -> Result<()> {
        self.best_efforts.upsert(record)
    }

    fn remove(&mut self, label: &str) -> Result<bool> {
        BestEffortRepository::remove(&mut self.best_efforts, label)
    }

    fn all(&self) -> Result<Vec<BestEffortRecord>> {
        self.best_efforts.all()
    }

    fn clear(&mut self, token: &RecalculationToken) -> Result<()> {
        BestEffortRepository::clear(&mut self.best_efforts, token)
    }
}

/// Load a session that must exist
pub fn require_session<S: SessionStore + ?Sized>(store: &S, id: &str) -> Result<Session> {
    store
        .load_session(id)?
        .ok_or_else(|| StrideError::SessionNotFound { id: id.to_string() })
}
