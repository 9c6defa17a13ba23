//! Services layer - Business logic
//!
//! Credential verification, session lifecycle, login throttling and the
//! background sweep that keeps the session table small.

pub mod auth;
pub mod maintenance;
pub mod password;
pub mod rate_limiter;

pub use auth::{AuthError, AuthService, LoginInput, RegisterInput};
pub use maintenance::spawn_session_sweeper;
pub use password::PasswordHasher;
pub use rate_limiter::LoginRateLimiter;
