// Single entry point for everything a connection can do.
//
// The hub owns the session registry and the connection binder and turns
// each inbound intent into the list of outbound deliveries it causes. It is
// plain synchronous state: callers must feed it one event at a time.

use tracing::{debug, info};

use crate::binder::ConnectionBinder;
use crate::error::SessionError;
use crate::id::{ConnectionId, SessionId};
use crate::projector::{masked_state, revealed_view};
use crate::protocol::{
    ClientIntent, ErrorMessage, HistoryUpdate, PromptResult, RejoinFailed, ServerSignal,
};
use crate::registry::SessionRegistry;
use crate::session::{RoundOutcome, Session};

/// One outbound signal and the connections that should receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub recipients: Vec<ConnectionId>,
    pub signal: ServerSignal,
}

impl Delivery {
    /// Address every current participant of `session`.
    pub fn to_session(session: &Session, signal: ServerSignal) -> Self {
        Delivery {
            recipients: session.participant_ids(),
            signal,
        }
    }

    pub fn to_connection(conn: &ConnectionId, signal: ServerSignal) -> Self {
        Delivery {
            recipients: vec![conn.clone()],
            signal,
        }
    }
}

/// Counters for periodic logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub sessions: usize,
    pub connections: usize,
}

pub struct Hub {
    registry: SessionRegistry,
    binder: ConnectionBinder,
}

impl Hub {
    pub fn new(registry: SessionRegistry) -> Self {
        Hub {
            registry,
            binder: ConnectionBinder::new(),
        }
    }

    /// Apply one intent from `conn`.
    ///
    /// Rejected intents produce no deliveries, except an unknown session on
    /// join (`error`) and a vanished session on rejoin (`rejoin-failed`).
    pub fn handle(&mut self, conn: &ConnectionId, intent: ClientIntent) -> Vec<Delivery> {
        let kind = intent.kind();
        match self.try_handle(conn, intent) {
            Ok(deliveries) => deliveries,
            Err(SessionError::SessionNotFound(id)) => {
                info!("Connection {} asked for unknown session {}", conn, id);
                vec![Delivery::to_connection(
                    conn,
                    ServerSignal::Error(ErrorMessage {
                        message: "Session not found".into(),
                    }),
                )]
            }
            Err(SessionError::RejoinFailed(id)) => {
                info!("Connection {} could not rejoin vanished session {}", conn, id);
                vec![Delivery::to_connection(
                    conn,
                    ServerSignal::RejoinFailed(RejoinFailed {
                        reason: "session-not-found".into(),
                    }),
                )]
            }
            Err(e) => {
                debug!("Ignoring {} from {}: {}", kind, conn, e);
                Vec::new()
            }
        }
    }

    /// The transport reported that `conn` is gone.
    pub fn disconnect(&mut self, conn: &ConnectionId) -> Vec<Delivery> {
        self.binder.disconnect(&mut self.registry, conn)
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.registry.get(id)
    }

    pub fn session_of(&self, conn: &ConnectionId) -> Option<&SessionId> {
        self.binder.session_of(conn)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.registry.len(),
            connections: self.binder.len(),
        }
    }

    fn try_handle(
        &mut self,
        conn: &ConnectionId,
        intent: ClientIntent,
    ) -> Result<Vec<Delivery>, SessionError> {
        match intent {
            ClientIntent::CreateSession(p) => self.binder.create(&mut self.registry, conn, &p.name),
            ClientIntent::JoinSession(p) => {
                self.binder
                    .join(&mut self.registry, conn, &p.session_id, &p.name)
            }
            ClientIntent::RejoinSession(p) => self.binder.rejoin(
                &mut self.registry,
                conn,
                &p.session_id,
                &p.name,
                p.was_moderator,
            ),
            ClientIntent::Vote(p) => {
                let session = self.bound_session_mut(conn)?;
                session.cast_vote(conn, p.value)?;
                debug!("Vote received in session {}", session.id());
                Ok(vec![state_update(session)])
            }
            ClientIntent::Reveal => {
                let session = self.bound_session_mut(conn)?;
                session.reveal(conn)?;
                info!("Votes revealed in session {}", session.id());
                Ok(vec![Delivery::to_session(
                    session,
                    ServerSignal::VotesRevealed(revealed_view(session)),
                )])
            }
            ClientIntent::ResetVotes => {
                let session = self.bound_session_mut(conn)?;
                session.reset_votes(conn)?;
                info!("Votes reset (no save) in session {}", session.id());
                Ok(vec![
                    state_update(session),
                    Delivery::to_session(session, ServerSignal::VotesReset),
                ])
            }
            ClientIntent::NewRound => {
                let session = self.bound_session_mut(conn)?;
                match session.new_round(conn)? {
                    RoundOutcome::Saved(entry) => {
                        info!(
                            "New round (unanimous: {}) in session {}",
                            entry.result,
                            session.id()
                        );
                        Ok(round_closed(session))
                    }
                    RoundOutcome::NeedsResult { round_number } => {
                        debug!(
                            "No consensus in session {}, prompting for round {}",
                            session.id(),
                            round_number
                        );
                        Ok(vec![Delivery::to_connection(
                            conn,
                            ServerSignal::PromptResult(PromptResult { round_number }),
                        )])
                    }
                }
            }
            ClientIntent::SubmitRoundResult(p) => {
                let result = p
                    .result
                    .to_integer()
                    .ok_or_else(|| SessionError::InvalidResult(p.result.to_string()))?;
                let session = self.bound_session_mut(conn)?;
                session.submit_round_result(conn, result, p.name.as_deref())?;
                info!(
                    "New round (result: {}) in session {}, history: {} rounds",
                    result,
                    session.id(),
                    session.history().len()
                );
                Ok(round_closed(session))
            }
            ClientIntent::UpdateRoundName(p) => {
                let session = self.bound_session_mut(conn)?;
                session.rename_round(conn, p.index, p.name.as_deref())?;
                info!(
                    "Round {} renamed to {:?} in session {}",
                    p.index + 1,
                    session.history()[p.index].name,
                    session.id()
                );
                Ok(vec![history_update(session)])
            }
            ClientIntent::ClearHistory => {
                let session = self.bound_session_mut(conn)?;
                session.clear_history(conn)?;
                info!("History cleared in session {}", session.id());
                Ok(vec![history_update(session)])
            }
            ClientIntent::PromoteModerator(p) => {
                let session = self.bound_session_mut(conn)?;
                session.promote(conn, &p.target_id)?;
                info!(
                    "Moderator changed in session {}: {}",
                    session.id(),
                    p.target_id
                );
                Ok(vec![state_update(session)])
            }
        }
    }

    fn bound_session_mut(&mut self, conn: &ConnectionId) -> Result<&mut Session, SessionError> {
        let session_id = self
            .binder
            .session_of(conn)
            .ok_or_else(|| SessionError::NotBound(conn.clone()))?;
        self.registry
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotBound(conn.clone()))
    }
}

fn state_update(session: &Session) -> Delivery {
    Delivery::to_session(session, ServerSignal::StateUpdate(masked_state(session)))
}

fn history_update(session: &Session) -> Delivery {
    Delivery::to_session(
        session,
        ServerSignal::HistoryUpdate(HistoryUpdate {
            history: session.history().to_vec(),
        }),
    )
}

/// Broadcasts after a round was saved and the votes cleared.
fn round_closed(session: &Session) -> Vec<Delivery> {
    vec![
        history_update(session),
        state_update(session),
        Delivery::to_session(session, ServerSignal::VotesReset),
    ]
}
