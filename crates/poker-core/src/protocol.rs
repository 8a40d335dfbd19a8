// JSON message types exchanged with browser clients.
//
// Every frame is `{"type": "<kebab-case name>", "payload": {...}}`; messages
// without data carry only the `type` field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{ConnectionId, SessionId};
use crate::session::HistoryEntry;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed client message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode server message: {0}")]
    Encode(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Intents a client can send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientIntent {
    CreateSession(CreateSessionPayload),
    JoinSession(JoinSessionPayload),
    RejoinSession(RejoinSessionPayload),
    Vote(VotePayload),
    Reveal,
    ResetVotes,
    NewRound,
    SubmitRoundResult(SubmitRoundResultPayload),
    UpdateRoundName(UpdateRoundNamePayload),
    ClearHistory,
    PromoteModerator(PromoteModeratorPayload),
}

impl ClientIntent {
    /// Wire name of the intent, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientIntent::CreateSession(_) => "create-session",
            ClientIntent::JoinSession(_) => "join-session",
            ClientIntent::RejoinSession(_) => "rejoin-session",
            ClientIntent::Vote(_) => "vote",
            ClientIntent::Reveal => "reveal",
            ClientIntent::ResetVotes => "reset-votes",
            ClientIntent::NewRound => "new-round",
            ClientIntent::SubmitRoundResult(_) => "submit-round-result",
            ClientIntent::UpdateRoundName(_) => "update-round-name",
            ClientIntent::ClearHistory => "clear-history",
            ClientIntent::PromoteModerator(_) => "promote-moderator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateSessionPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionPayload {
    pub session_id: SessionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinSessionPayload {
    pub session_id: SessionId,
    pub name: String,
    #[serde(default)]
    pub was_moderator: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VotePayload {
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitRoundResultPayload {
    pub result: RoundResult,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateRoundNamePayload {
    pub index: usize,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteModeratorPayload {
    pub target_id: ConnectionId,
}

/// A round result as submitted by the moderator's form, which may send
/// either a number or the raw text of an input field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RoundResult {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RoundResult {
    /// Integer value of the result, reading leading digits of text the way
    /// a browser's `parseInt` does (`" 8 points"` is 8, `"abc"` is nothing).
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            RoundResult::Integer(n) => Some(*n),
            RoundResult::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            RoundResult::Float(_) => None,
            RoundResult::Text(text) => leading_integer(text),
        }
    }
}

impl std::fmt::Display for RoundResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundResult::Integer(n) => write!(f, "{n}"),
            RoundResult::Float(x) => write!(f, "{x}"),
            RoundResult::Text(s) => f.write_str(s),
        }
    }
}

fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let digits: &str = {
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude: i64 = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Decode one text frame into an intent.
pub fn decode_intent(text: &str) -> Result<ClientIntent, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Signals the server sends to one or more clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerSignal {
    SessionCreated(SessionCreated),
    SessionJoined(SessionJoined),
    RejoinFailed(RejoinFailed),
    StateUpdate(MaskedState),
    VotesRevealed(RevealedView),
    VotesReset,
    HistoryUpdate(HistoryUpdate),
    PromptResult(PromptResult),
    Error(ErrorMessage),
}

impl ServerSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerSignal::SessionCreated(_) => "session-created",
            ServerSignal::SessionJoined(_) => "session-joined",
            ServerSignal::RejoinFailed(_) => "rejoin-failed",
            ServerSignal::StateUpdate(_) => "state-update",
            ServerSignal::VotesRevealed(_) => "votes-revealed",
            ServerSignal::VotesReset => "votes-reset",
            ServerSignal::HistoryUpdate(_) => "history-update",
            ServerSignal::PromptResult(_) => "prompt-result",
            ServerSignal::Error(_) => "error",
        }
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoined {
    pub session_id: SessionId,
    pub is_moderator: bool,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejoinFailed {
    pub reason: String,
}

/// One participant as everybody sees them before reveal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedParticipant {
    pub id: ConnectionId,
    pub name: String,
    pub has_voted: bool,
    pub is_moderator: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedState {
    pub participants: Vec<MaskedParticipant>,
    pub revealed: bool,
    pub moderator_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedVote {
    pub id: ConnectionId,
    pub name: String,
    pub vote: Option<i64>,
    pub is_moderator: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevealedView {
    pub votes: Vec<RevealedVote>,
    /// Mean of cast votes with one decimal, e.g. `"2.0"`.
    pub average: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryUpdate {
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub round_number: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_intent_with_payload() {
        let intent =
            decode_intent(r#"{"type":"join-session","payload":{"sessionId":"AB12CD","name":"Bob"}}"#)
                .unwrap();
        assert_eq!(
            intent,
            ClientIntent::JoinSession(JoinSessionPayload {
                session_id: SessionId::from("ab12cd"),
                name: "Bob".into(),
            })
        );
    }

    #[test]
    fn decodes_intent_without_payload() {
        assert_eq!(decode_intent(r#"{"type":"reveal"}"#).unwrap(), ClientIntent::Reveal);
        assert_eq!(
            decode_intent(r#"{"type":"clear-history"}"#).unwrap(),
            ClientIntent::ClearHistory
        );
    }

    #[test]
    fn rejoin_defaults_was_moderator_to_false() {
        let intent = decode_intent(
            r#"{"type":"rejoin-session","payload":{"sessionId":"x1","name":"Al"}}"#,
        )
        .unwrap();
        match intent {
            ClientIntent::RejoinSession(p) => assert!(!p.was_moderator),
            other => panic!("expected rejoin, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let err = decode_intent(r#"{"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(decode_intent("not json").is_err());
    }

    #[test]
    fn negative_rename_index_is_rejected() {
        assert!(decode_intent(
            r#"{"type":"update-round-name","payload":{"index":-1,"name":"x"}}"#
        )
        .is_err());
    }

    #[test]
    fn round_result_accepts_numbers_and_numeric_text() {
        let parse = |v: serde_json::Value| -> Option<i64> {
            let r: RoundResult = serde_json::from_value(v).unwrap();
            r.to_integer()
        };
        assert_eq!(parse(json!(8)), Some(8));
        assert_eq!(parse(json!(5.7)), Some(5));
        assert_eq!(parse(json!("13")), Some(13));
        assert_eq!(parse(json!(" 21 points")), Some(21));
        assert_eq!(parse(json!("-3")), Some(-3));
        assert_eq!(parse(json!("abc")), None);
        assert_eq!(parse(json!("")), None);
    }

    #[test]
    fn signal_encoding_uses_kebab_type_and_camel_fields() {
        let signal = ServerSignal::SessionJoined(SessionJoined {
            session_id: SessionId::from("abc123"),
            is_moderator: false,
            user_name: "Bob".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session-joined",
                "payload": {"sessionId": "abc123", "isModerator": false, "userName": "Bob"}
            })
        );
    }

    #[test]
    fn unit_signal_has_no_payload() {
        let value: serde_json::Value =
            serde_json::from_str(&ServerSignal::VotesReset.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "votes-reset"}));
    }
}
