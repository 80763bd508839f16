//! Phone-number authentication core
//!
//! OTP codes over SMS, JWT token pairs and server-side sessions, backed by
//! SQLite or MySQL through sqlx. The flow: [`AuthService::initiate`] sends a
//! one-time code, [`AuthService::verify_and_login`] exchanges a correct code
//! for an access/refresh token pair, and the session manager enforces
//! rotation, the per-user session cap and logout.
//!
//! [`AuthService::initiate`]: services::AuthService::initiate
//! [`AuthService::verify_and_login`]: services::AuthService::verify_and_login

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sms;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::AuthError;
pub use services::{
    create_auth_service, AuthResult, AuthService, OtpService, SessionService, TokenCodec,
};
