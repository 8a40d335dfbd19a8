// Session state: participants, votes, reveal flag, moderator, and round history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::id::{ConnectionId, SessionId};

/// A member of a session, keyed by the connection that joined.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    /// `None` until the participant votes in the current round.
    pub vote: Option<i64>,
}

/// One saved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub result: i64,
}

/// What `new-round` decided.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// Everybody who voted agreed; the round was appended to history and
    /// the votes cleared.
    Saved(HistoryEntry),
    /// No agreement. The moderator has to pick a result for round
    /// `round_number`; nothing changed.
    NeedsResult { round_number: usize },
}

/// What removing a participant did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Departure {
    /// The last participant left; the session must be deleted.
    Emptied,
    /// Others remain. `promoted` is the new moderator when the departing
    /// connection held the role.
    Remaining { promoted: Option<ConnectionId> },
}

/// One estimation room.
///
/// Participants are kept in join order, which makes moderator succession
/// (earliest-joined remaining participant) deterministic.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    moderator_id: ConnectionId,
    participants: Vec<Participant>,
    revealed: bool,
    history: Vec<HistoryEntry>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session with `creator` as sole participant and moderator.
    pub fn new(id: SessionId, creator: ConnectionId, name: String) -> Self {
        Session {
            id,
            moderator_id: creator.clone(),
            participants: vec![Participant {
                id: creator,
                name,
                vote: None,
            }],
            revealed: false,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn moderator_id(&self) -> &ConnectionId {
        &self.moderator_id
    }

    pub fn is_moderator(&self, conn: &ConnectionId) -> bool {
        &self.moderator_id == conn
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, conn: &ConnectionId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == conn)
    }

    pub fn has_participant(&self, conn: &ConnectionId) -> bool {
        self.participant(conn).is_some()
    }

    /// Connection ids of every participant, in join order.
    pub fn participant_ids(&self) -> Vec<ConnectionId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Add a participant with no vote. Does not touch the moderator.
    pub fn add_participant(&mut self, conn: ConnectionId, name: String) {
        if let Some(existing) = self.participants.iter_mut().find(|p| p.id == conn) {
            existing.name = name;
            existing.vote = None;
            return;
        }
        self.participants.push(Participant {
            id: conn,
            name,
            vote: None,
        });
    }

    /// Remove a participant and, if they were moderator, hand the role to
    /// the earliest-joined participant left.
    pub fn remove_participant(&mut self, conn: &ConnectionId) -> Departure {
        self.participants.retain(|p| &p.id != conn);

        let Some(first) = self.participants.first() else {
            return Departure::Emptied;
        };

        if &self.moderator_id == conn {
            self.moderator_id = first.id.clone();
            Departure::Remaining {
                promoted: Some(self.moderator_id.clone()),
            }
        } else {
            Departure::Remaining { promoted: None }
        }
    }

    /// Make `name` unique among current participants by appending
    /// `" (2)"`, `" (3)"`, ... (first free counter).
    pub fn unique_name(&self, name: &str) -> String {
        let taken = |candidate: &str| self.participants.iter().any(|p| p.name == candidate);
        if !taken(name) {
            return name.to_string();
        }
        (2..)
            .map(|n| format!("{name} ({n})"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    /// Hand the moderator role to `conn` if the current moderator slot does
    /// not point at a live participant. Returns whether the role moved.
    pub fn claim_orphaned_moderator(&mut self, conn: &ConnectionId) -> bool {
        if self.has_participant(&self.moderator_id) {
            return false;
        }
        self.moderator_id = conn.clone();
        true
    }

    // -----------------------------------------------------------------------
    // Round operations
    // -----------------------------------------------------------------------

    /// Record `value` as `voter`'s vote for the current round.
    pub fn cast_vote(&mut self, voter: &ConnectionId, value: i64) -> Result<(), SessionError> {
        if self.revealed {
            return Err(SessionError::VotingClosed);
        }
        let participant = self
            .participants
            .iter_mut()
            .find(|p| &p.id == voter)
            .ok_or_else(|| SessionError::NotParticipant(voter.clone()))?;
        participant.vote = Some(value);
        Ok(())
    }

    pub fn reveal(&mut self, requester: &ConnectionId) -> Result<(), SessionError> {
        self.require_moderator(requester)?;
        self.revealed = true;
        Ok(())
    }

    /// Clear every vote and hide the round again. History is untouched.
    pub fn reset_votes(&mut self, requester: &ConnectionId) -> Result<(), SessionError> {
        self.require_moderator(requester)?;
        self.clear_round();
        Ok(())
    }

    /// Close the revealed round: save it when the vote was unanimous,
    /// otherwise ask the moderator for a result.
    pub fn new_round(&mut self, requester: &ConnectionId) -> Result<RoundOutcome, SessionError> {
        self.require_moderator(requester)?;
        if !self.revealed {
            return Err(SessionError::NotRevealed);
        }

        match self.unanimous_vote() {
            Some(result) => {
                let entry = HistoryEntry {
                    name: self.default_round_name(self.history.len()),
                    result,
                };
                self.history.push(entry.clone());
                self.clear_round();
                Ok(RoundOutcome::Saved(entry))
            }
            None => Ok(RoundOutcome::NeedsResult {
                round_number: self.history.len() + 1,
            }),
        }
    }

    /// Save a moderator-chosen result for the current round and start the
    /// next one. A blank `name` falls back to `"Round N"`.
    pub fn submit_round_result(
        &mut self,
        requester: &ConnectionId,
        result: i64,
        name: Option<&str>,
    ) -> Result<HistoryEntry, SessionError> {
        self.require_moderator(requester)?;
        let name = match name.map(str::trim) {
            Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
            _ => self.default_round_name(self.history.len()),
        };
        let entry = HistoryEntry { name, result };
        self.history.push(entry.clone());
        self.clear_round();
        Ok(entry)
    }

    pub fn rename_round(
        &mut self,
        requester: &ConnectionId,
        index: usize,
        name: Option<&str>,
    ) -> Result<(), SessionError> {
        self.require_moderator(requester)?;
        let default_name = self.default_round_name(index);
        let len = self.history.len();
        let entry = self
            .history
            .get_mut(index)
            .ok_or(SessionError::InvalidIndex { index, len })?;
        entry.name = match name.map(str::trim) {
            Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
            _ => default_name,
        };
        Ok(())
    }

    pub fn clear_history(&mut self, requester: &ConnectionId) -> Result<(), SessionError> {
        self.require_moderator(requester)?;
        self.history.clear();
        Ok(())
    }

    /// Transfer the moderator role to another current participant.
    pub fn promote(
        &mut self,
        requester: &ConnectionId,
        target: &ConnectionId,
    ) -> Result<(), SessionError> {
        self.require_moderator(requester)?;
        if target == requester || !self.has_participant(target) {
            return Err(SessionError::InvalidPromotion(target.clone()));
        }
        self.moderator_id = target.clone();
        Ok(())
    }

    /// The shared value when at least one vote was cast and every cast vote
    /// is equal. Participants who did not vote are ignored.
    pub fn unanimous_vote(&self) -> Option<i64> {
        let mut votes = self.participants.iter().filter_map(|p| p.vote);
        let first = votes.next()?;
        votes.all(|v| v == first).then_some(first)
    }

    fn require_moderator(&self, requester: &ConnectionId) -> Result<(), SessionError> {
        if self.is_moderator(requester) {
            Ok(())
        } else {
            Err(SessionError::Unauthorized(requester.clone()))
        }
    }

    fn clear_round(&mut self) {
        for participant in &mut self.participants {
            participant.vote = None;
        }
        self.revealed = false;
    }

    fn default_round_name(&self, index: usize) -> String {
        format!("Round {}", index + 1)
    }
}
