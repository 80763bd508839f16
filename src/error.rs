//! Authentication error taxonomy
//!
//! Every fallible operation in the crate surfaces one of these variants.
//! Domain outcomes carry a stable machine-readable code via [`AuthError::code`];
//! infrastructure failures collapse into `Internal` and keep their cause
//! chain through anyhow.

use thiserror::Error;

/// Errors produced by the authentication services
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Phone must be E.164 (e.g., +14155552671)")]
    PhoneInvalid,

    #[error("Too many verification requests. Please try again later.")]
    RateLimitExceeded,

    #[error("Failed to send verification code")]
    SmsSendFailed,

    #[error("No verification code found. Please request a new one.")]
    OtpNotFound,

    #[error("Verification code has expired. Please request a new one.")]
    OtpExpired,

    #[error("Too many attempts. Please request a new code.")]
    OtpAttemptsExceeded,

    #[error("Invalid verification code")]
    InvalidOtp,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Malformed token")]
    TokenMalformed,

    #[error("Token signature verification failed")]
    BadSignature,

    #[error("Unsupported token")]
    UnsupportedToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token has expired")]
    RefreshTokenExpired,

    #[error("User not found")]
    UserNotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code for API surfaces and logs
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::PhoneInvalid => "PHONE_INVALID",
            AuthError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AuthError::SmsSendFailed => "SMS_SEND_FAILED",
            AuthError::OtpNotFound => "OTP_NOT_FOUND",
            AuthError::OtpExpired => "OTP_EXPIRED",
            AuthError::OtpAttemptsExceeded => "OTP_ATTEMPTS_EXCEEDED",
            AuthError::InvalidOtp => "INVALID_OTP",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenMalformed => "TOKEN_MALFORMED",
            AuthError::BadSignature => "BAD_SIGNATURE",
            AuthError::UnsupportedToken => "UNSUPPORTED_TOKEN",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
