//! Realtime delivery subsystem: the connection registry, the presence
//! broadcaster, and the message router.
//!
//! All three are plain values constructed once at startup and injected into
//! the handlers that need them; none of them can fail their callers.

pub mod presence;
pub mod registry;
pub mod router;

pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{MessageRouter, RoutingOutcome};
