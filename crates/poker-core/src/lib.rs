// Session core for planning poker: participants, hidden votes, reveal,
// moderator hand-off, and round history. No I/O lives here; the server crate
// feeds intents in and ships the resulting deliveries out.

pub mod binder;
pub mod error;
pub mod hub;
pub mod id;
pub mod projector;
pub mod protocol;
pub mod registry;
pub mod session;

pub use error::SessionError;
pub use hub::{Delivery, Hub, HubStats};
pub use id::{ConnectionId, SessionId};
pub use registry::SessionRegistry;
