//! Database repositories
//!
//! Repository pattern implementations for database access. Each repository
//! handles the query shapes one entity needs. Every mutation that can race
//! (attempt charge, consume, rotation, eviction, deactivation) is a single
//! guarded statement; losers of a race observe zero affected rows.

pub mod otp_challenge;
pub mod session;
pub mod user;

pub use otp_challenge::{OtpChallengeRepository, SqlxOtpChallengeRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
