// Reasons an intent is rejected by the session layer.

use thiserror::Error;

use crate::id::{ConnectionId, SessionId};

/// Every way a session operation can refuse to act.
///
/// Only [`SessionError::SessionNotFound`] and [`SessionError::RejoinFailed`]
/// ever reach a client; the hub logs the rest and drops the intent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session `{0}` not found")]
    SessionNotFound(SessionId),

    #[error("session `{0}` no longer exists, rejoin failed")]
    RejoinFailed(SessionId),

    #[error("connection {0} is not the moderator")]
    Unauthorized(ConnectionId),

    #[error("history index {index} out of bounds (len {len})")]
    InvalidIndex { index: usize, len: usize },

    #[error("connection {0} is not bound to a session")]
    NotBound(ConnectionId),

    #[error("connection {conn} is already bound to session `{session}`")]
    AlreadyBound {
        conn: ConnectionId,
        session: SessionId,
    },

    #[error("connection {0} is not a participant")]
    NotParticipant(ConnectionId),

    #[error("display name is empty")]
    EmptyName,

    #[error("round result {0:?} is not an integer")]
    InvalidResult(String),

    #[error("votes are already revealed")]
    VotingClosed,

    #[error("votes have not been revealed")]
    NotRevealed,

    #[error("cannot promote {0}")]
    InvalidPromotion(ConnectionId),
}
