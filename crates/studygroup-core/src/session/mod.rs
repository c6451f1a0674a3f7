//! Study sessions: the replicated record and the per-device coordinator.

mod coordinator;
mod model;

pub use coordinator::{LocalState, SessionCoordinator, SessionSettings};
pub use model::{ChatMessage, Session, SessionId, SessionPhase, SessionStatus, UserId};
