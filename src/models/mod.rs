//! Data models
//!
//! Entities persisted by the storage layer: identities and their sessions.

mod identity;
mod session;

pub use identity::{Identity, NewIdentity};
pub use session::Session;
