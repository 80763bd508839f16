//! Data models
//!
//! Entities persisted by the auth core:
//! - User (the identity owning sessions)
//! - OtpChallenge (one outstanding phone verification attempt)
//! - Session (one authenticated device/client binding)

mod otp_challenge;
mod session;
mod user;

pub use otp_challenge::OtpChallenge;
pub use session::Session;
pub use user::{Role, User};
