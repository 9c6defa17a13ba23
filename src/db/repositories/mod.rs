//! Database repositories
//!
//! Repository pattern implementations for database access.

pub mod identity;
pub mod session;

pub use identity::{IdentityField, IdentityRepository, SqlxIdentityRepository, UniqueViolation};
pub use session::{SessionRepository, SqlxSessionRepository};
