//! Session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One authenticated device/client binding.
///
/// The session row, not the token signature, is authoritative for liveness:
/// logout must take effect before token expiry. Tokens are opaque to the
/// session record and matched by exact value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user (many sessions per user)
    pub user_id: Uuid,
    /// Current access token (rotated in place on refresh)
    pub access_token: String,
    /// Current refresh token (rotated in place on refresh)
    pub refresh_token: String,
    /// Access-token horizon
    pub expires_at: DateTime<Utc>,
    /// Refresh-token horizon
    pub refresh_expires_at: DateTime<Utc>,
    /// Client IP at creation
    pub client_ip: String,
    /// Client user agent at creation
    pub user_agent: String,
    /// False once logged out or evicted, never reset to true
    pub active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last validate/refresh timestamp (None until first use)
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new session with both token horizons
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        access_token: String,
        refresh_token: String,
        client_ip: String,
        user_agent: String,
        now: DateTime<Utc>,
        access_ttl_hours: i64,
        refresh_ttl_days: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            access_token,
            refresh_token,
            expires_at: now + Duration::hours(access_ttl_hours),
            refresh_expires_at: now + Duration::days(refresh_ttl_days),
            client_ip,
            user_agent,
            active: true,
            created_at: now,
            last_used_at: None,
        }
    }

    /// Check if the access token lapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check if the refresh token lapsed
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.refresh_expires_at
    }

    /// Check if the session can authenticate access-token requests
    pub fn is_live_for_access(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> Session {
        Session::new(
            Uuid::new_v4(),
            "access-token".to_string(),
            "refresh-token".to_string(),
            "203.0.113.9".to_string(),
            "test-agent/1.0".to_string(),
            now,
            1,
            7,
        )
    }

    #[test]
    fn test_new_session_is_live() {
        let now = Utc::now();
        let s = session(now);

        assert!(s.active);
        assert!(s.last_used_at.is_none());
        assert!(s.is_live_for_access(now));
        assert_eq!(s.expires_at, now + Duration::hours(1));
        assert_eq!(s.refresh_expires_at, now + Duration::days(7));
    }

    #[test]
    fn test_access_expiry_is_independent_of_refresh() {
        let now = Utc::now();
        let s = session(now);
        let later = now + Duration::hours(2);

        // Access horizon passed, refresh horizon still open
        assert!(s.is_expired(later));
        assert!(!s.is_refresh_expired(later));
        assert!(!s.is_live_for_access(later));
    }

    #[test]
    fn test_deactivated_session_is_not_live() {
        let now = Utc::now();
        let mut s = session(now);
        s.active = false;

        // Not time-expired, but explicitly deactivated
        assert!(!s.is_expired(now));
        assert!(!s.is_live_for_access(now));
    }
}
