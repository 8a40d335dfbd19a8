// Outward views of a session. Recomputed on every broadcast, never cached.

use crate::protocol::{MaskedParticipant, MaskedState, RevealedView, RevealedVote};
use crate::session::Session;

/// The view everybody gets while votes are hidden: who voted, not what.
pub fn masked_state(session: &Session) -> MaskedState {
    let participants = session
        .participants()
        .iter()
        .map(|p| MaskedParticipant {
            id: p.id.clone(),
            name: p.name.clone(),
            has_voted: p.vote.is_some(),
            is_moderator: session.is_moderator(&p.id),
        })
        .collect();

    MaskedState {
        participants,
        revealed: session.is_revealed(),
        moderator_id: session.moderator_id().clone(),
    }
}

/// Every vote value plus the average of those cast.
pub fn revealed_view(session: &Session) -> RevealedView {
    let votes: Vec<RevealedVote> = session
        .participants()
        .iter()
        .map(|p| RevealedVote {
            id: p.id.clone(),
            name: p.name.clone(),
            vote: p.vote,
            is_moderator: session.is_moderator(&p.id),
        })
        .collect();

    let cast: Vec<i64> = votes.iter().filter_map(|v| v.vote).collect();
    RevealedView {
        average: format_average(&cast),
        votes,
    }
}

/// Arithmetic mean formatted with one decimal place, or `None` when no
/// votes were cast.
///
/// Rounding is done on the exact rational value, half away from zero, so
/// `[0, 0, 0, 1]` gives `"0.3"` rather than whatever the nearest binary
/// float happens to round to.
pub fn format_average(votes: &[i64]) -> Option<String> {
    if votes.is_empty() {
        return None;
    }
    let sum: i128 = votes.iter().map(|&v| i128::from(v)).sum();
    let count = votes.len() as i128;

    let negative = sum < 0;
    let tenths = (2 * sum.abs() * 10 + count) / (2 * count);
    let sign = if negative && tenths != 0 { "-" } else { "" };
    Some(format!("{sign}{}.{}", tenths / 10, tenths % 10))
}
