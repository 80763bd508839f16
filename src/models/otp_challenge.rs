//! OTP challenge model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One outstanding phone verification attempt.
///
/// Only the keyed digest of the code is ever stored. Challenges are mutated
/// only to charge an attempt or to set `consumed_at`; rows past their expiry
/// are removed by the periodic sweep, never by the verification path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpChallenge {
    /// Unique identifier
    pub id: Uuid,
    /// Phone number the code was sent to (E.164)
    pub phone: String,
    /// One-way keyed digest of the numeric code
    pub code_hash: String,
    /// Expiration timestamp (fixed TTL from creation)
    pub expires_at: DateTime<Utc>,
    /// Set once on successful verification, never cleared
    pub consumed_at: Option<DateTime<Utc>>,
    /// IP the send request came from
    pub request_ip: String,
    /// Verification attempts charged so far (monotonic)
    pub attempt_count: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl OtpChallenge {
    /// Create a fresh challenge with a fixed TTL
    pub fn new(
        phone: String,
        code_hash: String,
        request_ip: String,
        now: DateTime<Utc>,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone,
            code_hash,
            expires_at: now + Duration::minutes(ttl_minutes),
            consumed_at: None,
            request_ip,
            attempt_count: 0,
            created_at: now,
        }
    }

    /// Check if the challenge is past its TTL
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check if the challenge has already been verified
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Check if the challenge can still be verified
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_consumed()
    }
}
