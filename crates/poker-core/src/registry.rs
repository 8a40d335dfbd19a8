// In-memory table of live sessions.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::id::{ConnectionId, SessionId};
use crate::session::Session;

/// Length of generated session ids unless configured otherwise.
pub const DEFAULT_ID_LENGTH: usize = 6;

/// Owns every live [`Session`]. Each registry is independent, so tests can
/// build as many as they like.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    rng: StdRng,
    id_length: usize,
}

impl SessionRegistry {
    pub fn new(id_length: usize) -> Self {
        Self::with_rng(StdRng::from_entropy(), id_length)
    }

    /// Registry with a deterministic id sequence.
    pub fn seeded(seed: u64, id_length: usize) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), id_length)
    }

    fn with_rng(rng: StdRng, id_length: usize) -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
            rng,
            id_length: id_length.max(1),
        }
    }

    /// Open a session with `creator` as its sole participant and moderator.
    pub fn create(&mut self, creator: ConnectionId, name: String) -> SessionId {
        let id = self.unused_id();
        let session = Session::new(id.clone(), creator, name);
        self.sessions.insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Drop a session. Called once its last participant has left.
    pub fn delete(&mut self, id: &SessionId) -> Option<Session> {
        let removed = self.sessions.remove(id);
        if let Some(session) = &removed {
            let lifetime = chrono::Utc::now() - session.created_at();
            info!(
                "Session {} deleted (empty) after {}s",
                id,
                lifetime.num_seconds()
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unused_id(&mut self) -> SessionId {
        loop {
            let candidate = SessionId::random(&mut self.rng, self.id_length);
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_registers_session_with_creator_as_moderator() {
        let mut registry = SessionRegistry::seeded(1, DEFAULT_ID_LENGTH);
        let id = registry.create(ConnectionId::new("a"), "Alice".into());

        assert_eq!(id.as_str().len(), DEFAULT_ID_LENGTH);
        let session = registry.get(&id).unwrap();
        assert_eq!(session.moderator_id(), &ConnectionId::new("a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_ignores_case() {
        let mut registry = SessionRegistry::seeded(2, DEFAULT_ID_LENGTH);
        let id = registry.create(ConnectionId::new("a"), "Alice".into());
        let shouted = SessionId::from(id.as_str().to_uppercase());
        assert!(registry.get(&shouted).is_some());
    }

    #[test]
    fn generated_ids_do_not_collide() {
        // Two-character ids over a few hundred sessions force retries.
        let mut registry = SessionRegistry::seeded(3, 2);
        for i in 0..500 {
            registry.create(ConnectionId::new(format!("c{i}")), format!("U{i}"));
        }
        assert_eq!(registry.len(), 500);
    }

    #[test]
    fn delete_removes_session() {
        let mut registry = SessionRegistry::seeded(4, DEFAULT_ID_LENGTH);
        let id = registry.create(ConnectionId::new("a"), "Alice".into());
        assert!(registry.delete(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.delete(&id).is_none());
        assert!(registry.is_empty());
    }
}
