// Integration tests for the session hub.
//
// These drive the public API the way the server does: JSON intents in,
// deliveries out. They cover the full estimation flow, reconnect recovery,
// and invariants that must hold after any sequence of events.

use poker_core::protocol::{decode_intent, ServerSignal};
use poker_core::{ConnectionId, Delivery, Hub, SessionId, SessionRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ===========================================================================
// Helpers
// ===========================================================================

fn conn(raw: &str) -> ConnectionId {
    ConnectionId::new(raw)
}

fn send(hub: &mut Hub, from: &str, json: &str) -> Vec<Delivery> {
    hub.handle(&conn(from), decode_intent(json).expect("test intent must decode"))
}

fn create(hub: &mut Hub, from: &str, name: &str) -> SessionId {
    send(
        hub,
        from,
        &format!(r#"{{"type":"create-session","payload":{{"name":"{name}"}}}}"#),
    );
    hub.session_of(&conn(from)).expect("creator is bound").clone()
}

fn join(hub: &mut Hub, from: &str, id: &SessionId, name: &str) -> Vec<Delivery> {
    send(
        hub,
        from,
        &format!(r#"{{"type":"join-session","payload":{{"sessionId":"{id}","name":"{name}"}}}}"#),
    )
}

fn vote(hub: &mut Hub, from: &str, value: i64) -> Vec<Delivery> {
    send(
        hub,
        from,
        &format!(r#"{{"type":"vote","payload":{{"value":{value}}}}}"#),
    )
}

/// Every session the hub knows about must have exactly one moderator who
/// is one of its participants.
fn assert_moderator_invariant(hub: &Hub, ids: &[SessionId]) {
    for id in ids {
        if let Some(session) = hub.session(id) {
            assert!(!session.participants().is_empty(), "empty session {id} survived");
            assert!(
                session.has_participant(session.moderator_id()),
                "moderator of {id} is not a participant"
            );
        }
    }
}

// ===========================================================================
// End-to-end flow
// ===========================================================================

#[test]
fn unanimous_round_is_saved_to_history() {
    let mut hub = Hub::new(SessionRegistry::seeded(42, 6));
    let id = create(&mut hub, "alice", "Alice");
    join(&mut hub, "bob", &id, "Bob");

    vote(&mut hub, "alice", 5);
    vote(&mut hub, "bob", 5);

    let revealed = send(&mut hub, "alice", r#"{"type":"reveal"}"#);
    match &revealed[0].signal {
        ServerSignal::VotesRevealed(view) => {
            assert_eq!(view.average.as_deref(), Some("5.0"));
            assert!(view.votes.iter().all(|v| v.vote == Some(5)));
        }
        other => panic!("expected votes-revealed, got {other:?}"),
    }
    assert_eq!(hub.session(&id).unwrap().unanimous_vote(), Some(5));

    let deliveries = send(&mut hub, "alice", r#"{"type":"new-round"}"#);
    let kinds: Vec<&str> = deliveries.iter().map(|d| d.signal.kind()).collect();
    assert_eq!(kinds, vec!["history-update", "state-update", "votes-reset"]);

    let session = hub.session(&id).unwrap();
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.history()[0].name, "Round 1");
    assert_eq!(session.history()[0].result, 5);
    assert!(!session.is_revealed());
    assert!(session.participants().iter().all(|p| p.vote.is_none()));
}

#[test]
fn session_ids_are_matched_case_insensitively() {
    let mut hub = Hub::new(SessionRegistry::seeded(1, 6));
    let id = create(&mut hub, "alice", "Alice");
    let shouted = id.as_str().to_uppercase();

    let deliveries = send(
        &mut hub,
        "bob",
        &format!(r#"{{"type":"join-session","payload":{{"sessionId":" {shouted} ","name":"Bob"}}}}"#),
    );
    assert_eq!(deliveries[0].signal.kind(), "session-joined");
    assert_eq!(hub.session_of(&conn("bob")), Some(&id));
}

// ===========================================================================
// Reconnect recovery
// ===========================================================================

#[test]
fn refresh_while_old_connection_lingers_gets_suffixed_name() {
    let mut hub = Hub::new(SessionRegistry::seeded(7, 6));
    let id = create(&mut hub, "alice", "Alice");
    join(&mut hub, "bob", &id, "Bob");

    // Alice's browser reconnects before the old socket is reaped.
    let deliveries = send(
        &mut hub,
        "alice-2",
        &format!(
            r#"{{"type":"rejoin-session","payload":{{"sessionId":"{id}","name":"Alice","wasModerator":true}}}}"#
        ),
    );
    match &deliveries[0].signal {
        ServerSignal::SessionJoined(joined) => {
            assert_eq!(joined.user_name, "Alice (2)");
            assert!(!joined.is_moderator, "live moderator must keep the role");
        }
        other => panic!("expected session-joined, got {other:?}"),
    }

    // Old socket finally drops; the role goes to the earliest-joined
    // remaining participant, Bob.
    hub.disconnect(&conn("alice"));
    assert_eq!(hub.session(&id).unwrap().moderator_id(), &conn("bob"));
}

#[test]
fn rejoin_after_session_vanished_fails() {
    let mut hub = Hub::new(SessionRegistry::seeded(8, 6));
    let id = create(&mut hub, "alice", "Alice");
    hub.disconnect(&conn("alice"));

    let deliveries = send(
        &mut hub,
        "alice-2",
        &format!(
            r#"{{"type":"rejoin-session","payload":{{"sessionId":"{id}","name":"Alice","wasModerator":true}}}}"#
        ),
    );
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].signal.kind(), "rejoin-failed");

    let deliveries = join(&mut hub, "bob", &id, "Bob");
    assert_eq!(deliveries[0].signal.kind(), "error");
}

#[test]
fn removed_connection_is_not_addressed_by_later_broadcasts() {
    let mut hub = Hub::new(SessionRegistry::seeded(9, 6));
    let id = create(&mut hub, "alice", "Alice");
    join(&mut hub, "bob", &id, "Bob");
    join(&mut hub, "carol", &id, "Carol");

    let deliveries = hub.disconnect(&conn("bob"));
    assert_eq!(deliveries[0].recipients, vec![conn("alice"), conn("carol")]);

    let deliveries = vote(&mut hub, "carol", 3);
    assert!(!deliveries[0].recipients.contains(&conn("bob")));
}

// ===========================================================================
// Invariants under arbitrary event sequences
// ===========================================================================

#[test]
fn random_event_sequences_preserve_invariants() {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut hub = Hub::new(SessionRegistry::seeded(3, 6));
    let mut sessions: Vec<SessionId> = Vec::new();
    let mut next_conn = 0usize;
    let mut live: Vec<String> = Vec::new();

    for _ in 0..2000 {
        let roll = rng.gen_range(0..10);
        let deliveries = match roll {
            0 => {
                let c = format!("c{next_conn}");
                next_conn += 1;
                live.push(c.clone());
                let id = create(&mut hub, &c, "Host");
                sessions.push(id);
                Vec::new()
            }
            1 | 2 if !sessions.is_empty() => {
                let c = format!("c{next_conn}");
                next_conn += 1;
                live.push(c.clone());
                let id = sessions[rng.gen_range(0..sessions.len())].clone();
                join(&mut hub, &c, &id, "Guest")
            }
            3 if !live.is_empty() => {
                let c = live.swap_remove(rng.gen_range(0..live.len()));
                hub.disconnect(&conn(&c))
            }
            _ if !live.is_empty() => {
                let c = live[rng.gen_range(0..live.len())].clone();
                let intent = match rng.gen_range(0..6) {
                    0 => format!(r#"{{"type":"vote","payload":{{"value":{}}}}}"#, rng.gen_range(1..6)),
                    1 => r#"{"type":"reveal"}"#.to_string(),
                    2 => r#"{"type":"new-round"}"#.to_string(),
                    3 => r#"{"type":"reset-votes"}"#.to_string(),
                    4 => {
                        let target = &live[rng.gen_range(0..live.len())];
                        format!(r#"{{"type":"promote-moderator","payload":{{"targetId":"{target}"}}}}"#)
                    }
                    _ => r#"{"type":"submit-round-result","payload":{"result":3}}"#.to_string(),
                };
                send(&mut hub, &c, &intent)
            }
            _ => Vec::new(),
        };

        assert_moderator_invariant(&hub, &sessions);

        // Vote values never leave the server while a round is hidden.
        for delivery in &deliveries {
            if let ServerSignal::StateUpdate(state) = &delivery.signal {
                let json = serde_json::to_value(state).unwrap();
                for p in json["participants"].as_array().unwrap() {
                    assert!(p.get("vote").is_none());
                }
            }
        }
    }
}
