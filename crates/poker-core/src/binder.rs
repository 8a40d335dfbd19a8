// Connection lifecycle: create, join, rejoin, and disconnect.
//
// The binder only remembers which session each connection belongs to. All
// session data stays in the registry.

use std::collections::HashMap;

use tracing::info;

use crate::error::SessionError;
use crate::hub::Delivery;
use crate::id::{ConnectionId, SessionId};
use crate::projector::{masked_state, revealed_view};
use crate::protocol::{HistoryUpdate, ServerSignal, SessionCreated, SessionJoined};
use crate::registry::SessionRegistry;
use crate::session::{Departure, Session};

/// Maps live connections to the session they joined. A connection joins at
/// most one session over its lifetime; the first join wins.
#[derive(Debug, Default)]
pub struct ConnectionBinder {
    bindings: HashMap<ConnectionId, SessionId>,
}

impl ConnectionBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_of(&self, conn: &ConnectionId) -> Option<&SessionId> {
        self.bindings.get(conn)
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Open a new session with `conn` as moderator.
    pub fn create(
        &mut self,
        registry: &mut SessionRegistry,
        conn: &ConnectionId,
        name: &str,
    ) -> Result<Vec<Delivery>, SessionError> {
        self.ensure_unbound(conn)?;
        let name = display_name(name)?;

        let session_id = registry.create(conn.clone(), name.clone());
        self.bindings.insert(conn.clone(), session_id.clone());
        info!("Session {} created by {}", session_id, name);

        let session = registry
            .get(&session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
        Ok(vec![
            Delivery::to_connection(
                conn,
                ServerSignal::SessionCreated(SessionCreated {
                    session_id: session_id.clone(),
                }),
            ),
            Delivery::to_session(session, ServerSignal::StateUpdate(masked_state(session))),
        ])
    }

    /// Join an existing session as a regular participant.
    pub fn join(
        &mut self,
        registry: &mut SessionRegistry,
        conn: &ConnectionId,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Vec<Delivery>, SessionError> {
        self.ensure_unbound(conn)?;
        let name = display_name(name)?;
        let session = registry
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;

        session.add_participant(conn.clone(), name.clone());
        self.bindings.insert(conn.clone(), session_id.clone());
        info!("{} joined session {}", name, session_id);

        Ok(welcome(session, conn, false, name))
    }

    /// Recover membership after a transport reconnect.
    ///
    /// The display name is made unique, and the moderator role is restored
    /// when `was_moderator` is set and nobody live holds it.
    pub fn rejoin(
        &mut self,
        registry: &mut SessionRegistry,
        conn: &ConnectionId,
        session_id: &SessionId,
        name: &str,
        was_moderator: bool,
    ) -> Result<Vec<Delivery>, SessionError> {
        self.ensure_unbound(conn)?;
        let name = display_name(name)?;
        let session = registry
            .get_mut(session_id)
            .ok_or_else(|| SessionError::RejoinFailed(session_id.clone()))?;

        let final_name = session.unique_name(&name);
        let became_moderator = was_moderator && session.claim_orphaned_moderator(conn);

        session.add_participant(conn.clone(), final_name.clone());
        self.bindings.insert(conn.clone(), session_id.clone());
        info!("{} rejoined session {}", final_name, session_id);

        Ok(welcome(session, conn, became_moderator, final_name))
    }

    /// Drop `conn` from its session, deleting the session if it is now empty
    /// and handing off the moderator role if needed.
    pub fn disconnect(
        &mut self,
        registry: &mut SessionRegistry,
        conn: &ConnectionId,
    ) -> Vec<Delivery> {
        let Some(session_id) = self.bindings.remove(conn) else {
            return Vec::new();
        };
        let Some(session) = registry.get_mut(&session_id) else {
            return Vec::new();
        };

        match session.remove_participant(conn) {
            Departure::Emptied => {
                registry.delete(&session_id);
                Vec::new()
            }
            Departure::Remaining { promoted } => {
                if let Some(new_moderator) = promoted {
                    let name = session
                        .participant(&new_moderator)
                        .map(|p| p.name.as_str())
                        .unwrap_or_default();
                    info!("New moderator in session {}: {}", session_id, name);
                }
                vec![Delivery::to_session(
                    session,
                    ServerSignal::StateUpdate(masked_state(session)),
                )]
            }
        }
    }

    fn ensure_unbound(&self, conn: &ConnectionId) -> Result<(), SessionError> {
        match self.bindings.get(conn) {
            Some(session) => Err(SessionError::AlreadyBound {
                conn: conn.clone(),
                session: session.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn display_name(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::EmptyName);
    }
    Ok(trimmed.to_string())
}

/// Signals for a connection that just entered `session`: its own
/// confirmation, the refreshed roster for everyone, and whatever round and
/// history state it missed.
fn welcome(
    session: &Session,
    conn: &ConnectionId,
    is_moderator: bool,
    user_name: String,
) -> Vec<Delivery> {
    let mut deliveries = vec![
        Delivery::to_connection(
            conn,
            ServerSignal::SessionJoined(SessionJoined {
                session_id: session.id().clone(),
                is_moderator,
                user_name,
            }),
        ),
        Delivery::to_session(session, ServerSignal::StateUpdate(masked_state(session))),
    ];
    if session.is_revealed() {
        deliveries.push(Delivery::to_connection(
            conn,
            ServerSignal::VotesRevealed(revealed_view(session)),
        ));
    }
    if !session.history().is_empty() {
        deliveries.push(Delivery::to_connection(
            conn,
            ServerSignal::HistoryUpdate(HistoryUpdate {
                history: session.history().to_vec(),
            }),
        ));
    }
    deliveries
}
