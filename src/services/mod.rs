//! Business logic services
//!
//! The OTP engine, token codec, session manager and the auth orchestrator
//! that ties them together, plus phone normalization helpers. Services hold
//! their repositories as trait objects and take time from an injected clock.

pub mod auth;
pub mod otp;
pub mod phone;
pub mod session;
pub mod token;

pub use auth::{AuthResult, AuthService};
pub use otp::OtpService;
pub use session::SessionService;
pub use token::{Claims, TokenCodec, TokenKind};

use crate::clock::Clock;
use crate::config::Config;
use crate::db::repositories::{
    SqlxOtpChallengeRepository, SqlxSessionRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::sms;
use std::sync::Arc;

/// Wire the full service stack from configuration and a connected pool.
/// The SMS backend is selected from config; pass a [`SystemClock`] for
/// production use.
///
/// [`SystemClock`]: crate::clock::SystemClock
pub fn create_auth_service(
    pool: DynDatabasePool,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> AuthService {
    let users = SqlxUserRepository::boxed(pool.clone());
    let codec = Arc::new(TokenCodec::new(&config.jwt.secret));

    let otp = Arc::new(OtpService::new(
        SqlxOtpChallengeRepository::boxed(pool.clone()),
        sms::create_provider(&config.sms),
        clock.clone(),
        config.otp.clone(),
    ));
    let sessions = Arc::new(SessionService::new(
        SqlxSessionRepository::boxed(pool),
        users.clone(),
        codec.clone(),
        clock.clone(),
        config.session.clone(),
    ));

    AuthService::new(otp, sessions, users, codec, clock, config.session.clone())
}
