//! Session lifecycle manager
//!
//! Owns the server-side record behind every issued token pair: creation
//! under the per-user cap, access-token validation, refresh-token rotation,
//! logout and the expiry sweep. A token that verifies cryptographically is
//! still refused unless its session row is active.

use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::db::repositories::{SessionRepository, UserRepository};
use crate::error::AuthError;
use crate::models::{Session, User};
use crate::services::auth::AuthResult;
use crate::services::token::{TokenCodec, TokenKind};

/// Session lifecycle manager
pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions,
            users,
            codec,
            clock,
            config,
        }
    }

    /// Record a new session for an issued token pair. When the user is at
    /// the session cap, the oldest active session is evicted first.
    pub async fn create_session(
        &self,
        user: &User,
        access_token: String,
        refresh_token: String,
        client_ip: String,
        user_agent: String,
    ) -> Result<Session, AuthError> {
        let active = self.sessions.count_active_by_user(user.id).await?;
        if active >= self.config.max_sessions_per_user {
            if self.sessions.deactivate_oldest_active(user.id).await? {
                info!(user_id = %user.id, "Evicted oldest session at cap");
            }
        }

        let session = Session::new(
            user.id,
            access_token,
            refresh_token,
            client_ip,
            user_agent,
            self.clock.now(),
            self.config.access_token_expiry_hours,
            self.config.refresh_token_expiry_days,
        );
        let session = self.sessions.create(&session).await?;

        Ok(session)
    }

    /// Resolve an access token to its user.
    ///
    /// The token must belong to an active session whose access window is
    /// still open. Usage is stamped best effort.
    pub async fn validate(&self, access_token: &str) -> Result<User, AuthError> {
        let session = self
            .sessions
            .find_active_by_access_token(access_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = self.clock.now();
        if session.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if let Err(e) = self.sessions.touch_last_used(session.id, now).await {
            warn!(session_id = %session.id, error = %e, "Failed to stamp session usage");
        }

        Ok(user)
    }

    /// Exchange a refresh token for a fresh token pair, rotating the session
    /// in place. Each refresh token is usable exactly once.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResult, AuthError> {
        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        let now = self.clock.now();
        if !session.active || session.is_refresh_expired(now) {
            warn!(session_id = %session.id, "Refresh on dead session");
            return Err(AuthError::RefreshTokenExpired);
        }

        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let new_access = self.codec.issue(
            &user,
            TokenKind::Access,
            now,
            Duration::hours(self.config.access_token_expiry_hours),
        )?;
        let new_refresh = self.codec.issue(
            &user,
            TokenKind::Refresh,
            now,
            Duration::days(self.config.refresh_token_expiry_days),
        )?;

        let rotated = self
            .sessions
            .rotate_tokens(
                refresh_token,
                &new_access,
                &new_refresh,
                now + Duration::hours(self.config.access_token_expiry_hours),
                now + Duration::days(self.config.refresh_token_expiry_days),
                now,
            )
            .await?;
        if !rotated {
            warn!(session_id = %session.id, "Refresh token already rotated");
            return Err(AuthError::InvalidRefreshToken);
        }

        info!(user_id = %user.id, session_id = %session.id, "Token pair rotated");

        Ok(AuthResult {
            user,
            access_token: new_access,
            refresh_token: new_refresh,
            session_id: session.id,
        })
    }

    /// Deactivate the session holding this access token
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        if !self.sessions.deactivate_by_access_token(access_token).await? {
            return Err(AuthError::InvalidToken);
        }

        info!("Session deactivated");
        Ok(())
    }

    /// Deactivate every active session of a user, returning how many
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let count = self.sessions.deactivate_all_for_user(user_id).await?;
        info!(user_id = %user_id, count, "Logged out all devices");
        Ok(count)
    }

    /// Active sessions of a user, newest first
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        Ok(self.sessions.list_active_by_user(user_id).await?)
    }

    /// Delete sessions whose refresh window has closed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, AuthError> {
        let deleted = self.sessions.delete_expired(self.clock.now()).await?;
        info!(deleted, "Cleaned up expired sessions");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};
    use chrono::Utc;

    struct Harness {
        service: SessionService,
        users: Arc<dyn UserRepository>,
        codec: Arc<TokenCodec>,
        clock: Arc<ManualClock>,
    }

    async fn setup(config: SessionConfig) -> Harness {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(pool.clone()));
        let codec = Arc::new(TokenCodec::new("test-secret"));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = SessionService::new(
            Arc::new(SqlxSessionRepository::new(pool)),
            users.clone(),
            codec.clone(),
            clock.clone(),
            config,
        );

        Harness {
            service,
            users,
            codec,
            clock,
        }
    }

    async fn login(h: &Harness, user: &User) -> Session {
        let now = h.clock.now();
        let access = h
            .codec
            .issue(user, TokenKind::Access, now, Duration::hours(1))
            .unwrap();
        let refresh = h
            .codec
            .issue(user, TokenKind::Refresh, now, Duration::days(7))
            .unwrap();
        h.service
            .create_session(
                user,
                access,
                refresh,
                "203.0.113.9".to_string(),
                "test-agent".to_string(),
            )
            .await
            .expect("Failed to create session")
    }

    async fn create_user(h: &Harness, phone: &str) -> User {
        let user = User::placeholder(phone.to_string(), h.clock.now());
        h.users.create(&user).await.expect("Failed to create user")
    }

    #[tokio::test]
    async fn test_validate_returns_user() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let session = login(&h, &user).await;

        let resolved = h.service.validate(&session.access_token).await.unwrap();
        assert_eq!(resolved.id, user.id);

        // Usage was stamped
        let listed = h.service.list_sessions(user.id).await.unwrap();
        assert!(listed[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_validate_unknown_token() {
        let h = setup(SessionConfig::default()).await;
        assert!(matches!(
            h.service.validate("no-such-token").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_validate_expired_access_window() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let session = login(&h, &user).await;

        h.clock.advance(Duration::hours(2));

        assert!(matches!(
            h.service.validate(&session.access_token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_session_cap_evicts_oldest() {
        let h = setup(SessionConfig {
            max_sessions_per_user: 2,
            ..Default::default()
        })
        .await;
        let user = create_user(&h, "+14155552671").await;

        let s1 = login(&h, &user).await;
        h.clock.advance(Duration::seconds(1));
        let s2 = login(&h, &user).await;
        h.clock.advance(Duration::seconds(1));
        let s3 = login(&h, &user).await;

        let active = h.service.list_sessions(user.id).await.unwrap();
        let ids: Vec<_> = active.iter().map(|s| s.id).collect();
        assert_eq!(active.len(), 2);
        assert!(ids.contains(&s2.id));
        assert!(ids.contains(&s3.id));
        assert!(!ids.contains(&s1.id));

        // The evicted session's access token no longer validates
        assert!(matches!(
            h.service.validate(&s1.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_single_use() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let session = login(&h, &user).await;

        h.clock.advance(Duration::minutes(30));
        let result = h.service.refresh(&session.refresh_token).await.unwrap();
        assert_eq!(result.session_id, session.id);
        assert_ne!(result.access_token, session.access_token);
        assert_ne!(result.refresh_token, session.refresh_token);

        // The new access token validates, the old one does not
        assert!(h.service.validate(&result.access_token).await.is_ok());
        assert!(h.service.validate(&session.access_token).await.is_err());

        // Replaying the old refresh token fails
        assert!(matches!(
            h.service.refresh(&session.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));

        // The rotated token refreshes again
        h.clock.advance(Duration::minutes(30));
        assert!(h.service.refresh(&result.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_expired_window() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let session = login(&h, &user).await;

        h.clock.advance(Duration::days(8));

        assert!(matches!(
            h.service.refresh(&session.refresh_token).await,
            Err(AuthError::RefreshTokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_refresh_after_logout() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let session = login(&h, &user).await;

        h.service.logout(&session.access_token).await.unwrap();

        assert!(matches!(
            h.service.refresh(&session.refresh_token).await,
            Err(AuthError::RefreshTokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_logout_is_single_shot() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let session = login(&h, &user).await;

        h.service.logout(&session.access_token).await.unwrap();
        assert!(matches!(
            h.service.validate(&session.access_token).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            h.service.logout(&session.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_all_devices() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        let s1 = login(&h, &user).await;
        h.clock.advance(Duration::seconds(1));
        let s2 = login(&h, &user).await;

        let count = h.service.logout_all(user.id).await.unwrap();
        assert_eq!(count, 2);
        assert!(h.service.validate(&s1.access_token).await.is_err());
        assert!(h.service.validate(&s2.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_expired_sessions() {
        let h = setup(SessionConfig::default()).await;
        let user = create_user(&h, "+14155552671").await;
        login(&h, &user).await;

        assert_eq!(h.service.cleanup_expired_sessions().await.unwrap(), 0);

        h.clock.advance(Duration::days(8));
        assert_eq!(h.service.cleanup_expired_sessions().await.unwrap(), 1);
        assert!(h.service.list_sessions(user.id).await.unwrap().is_empty());
    }
}
