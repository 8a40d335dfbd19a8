// Identifiers for connections and sessions.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Opaque identity of one live transport connection.
///
/// Doubles as the participant key inside a session. The only contract is
/// uniqueness among live connections; nothing inspects its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(raw: impl Into<String>) -> Self {
        ConnectionId(raw.into())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Characters a generated session id is drawn from (base 36).
const SESSION_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Short session identifier, always stored lowercase.
///
/// Ids typed by users are case-insensitive; deserialization and
/// [`SessionId::from`] trim and lowercase the input so lookups agree with
/// generated ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Draw a random id of `len` base-36 characters.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let id = (0..len)
            .map(|_| {
                let idx = rng.gen_range(0..SESSION_ID_ALPHABET.len());
                SESSION_ID_ALPHABET[idx] as char
            })
            .collect();
        SessionId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        SessionId(raw.trim().to_lowercase())
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        SessionId(raw.trim().to_lowercase())
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn session_id_input_is_case_insensitive() {
        assert_eq!(SessionId::from("  AbC12 "), SessionId::from("abc12"));
        assert_eq!(SessionId::from("XYZ").as_str(), "xyz");
    }

    #[test]
    fn random_session_id_uses_base36_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let id = SessionId::random(&mut rng, 6);
            assert_eq!(id.as_str().len(), 6);
            assert!(id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn session_id_deserializes_normalized() {
        let id: SessionId = serde_json::from_str("\"Q7RX2A\"").unwrap();
        assert_eq!(id.as_str(), "q7rx2a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"q7rx2a\"");
    }

    #[test]
    fn connection_id_serializes_as_plain_string() {
        let id = ConnectionId::new("conn-4");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"conn-4\"");
        assert_eq!(id.to_string(), "conn-4");
    }
}
