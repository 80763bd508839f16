//! Authentication orchestrator
//!
//! Ties the OTP engine, the token codec and the session manager into the
//! phone login flow: initiate sends a code, verify exchanges a correct code
//! for a token pair backed by a session row.

use chrono::Duration;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::db::repositories::UserRepository;
use crate::error::AuthError;
use crate::models::{Session, User};
use crate::services::otp::OtpService;
use crate::services::phone;
use crate::services::session::SessionService;
use crate::services::token::{TokenCodec, TokenKind};

/// Outcome of a successful login or refresh
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
}

/// Phone login orchestrator
pub struct AuthService {
    otp: Arc<OtpService>,
    sessions: Arc<SessionService>,
    users: Arc<dyn UserRepository>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl AuthService {
    pub fn new(
        otp: Arc<OtpService>,
        sessions: Arc<SessionService>,
        users: Arc<dyn UserRepository>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            otp,
            sessions,
            users,
            codec,
            clock,
            config,
        }
    }

    /// Start a phone login by sending a verification code
    pub async fn initiate(&self, phone_number: &str, client_ip: &str) -> Result<(), AuthError> {
        let normalized = phone::normalize_to_e164(phone_number)?;
        info!(phone = %phone::mask(&normalized), "Initiating phone auth");

        self.otp.send(&normalized, client_ip).await
    }

    /// Complete a phone login by verifying the code and issuing a session
    pub async fn verify_and_login(
        &self,
        phone_number: &str,
        code: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<AuthResult, AuthError> {
        let normalized = phone::normalize_to_e164(phone_number)?;
        let masked = phone::mask(&normalized);

        if !self.otp.verify(&normalized, code, client_ip).await? {
            return Err(AuthError::InvalidOtp);
        }

        let mut user = self.find_or_create_user(&normalized).await?;

        let now = self.clock.now();
        user.last_login_at = Some(now);
        user.updated_at = now;
        let user = self.users.save(&user).await?;

        let access_token = self.codec.issue(
            &user,
            TokenKind::Access,
            now,
            Duration::hours(self.config.access_token_expiry_hours),
        )?;
        let refresh_token = self.codec.issue(
            &user,
            TokenKind::Refresh,
            now,
            Duration::days(self.config.refresh_token_expiry_days),
        )?;

        let session = self
            .sessions
            .create_session(
                &user,
                access_token.clone(),
                refresh_token.clone(),
                client_ip.to_string(),
                user_agent.to_string(),
            )
            .await?;

        info!(phone = %masked, user_id = %user.id, "User authenticated");

        Ok(AuthResult {
            user,
            access_token,
            refresh_token,
            session_id: session.id,
        })
    }

    /// Exchange a refresh token for a fresh token pair
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client_ip: &str,
    ) -> Result<AuthResult, AuthError> {
        info!(client_ip = %client_ip, "Refreshing token");
        self.sessions.refresh(refresh_token).await
    }

    /// Resolve an access token to its user
    pub async fn validate_token(&self, access_token: &str) -> Result<User, AuthError> {
        self.sessions.validate(access_token).await
    }

    /// End the session holding this access token
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        self.sessions.logout(access_token).await
    }

    /// End every active session of a user
    pub async fn logout_all_devices(&self, user_id: Uuid) -> Result<u64, AuthError> {
        self.sessions.logout_all(user_id).await
    }

    /// Active sessions of a user, newest first
    pub async fn user_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        self.sessions.list_sessions(user_id).await
    }

    async fn find_or_create_user(&self, phone: &str) -> Result<User, AuthError> {
        if let Some(user) = self.users.find_by_phone(phone).await? {
            return Ok(user);
        }

        let user = User::placeholder(phone.to_string(), self.clock.now());
        let user = self.users.create(&user).await?;
        info!(phone = %phone::mask(phone), user_id = %user.id, "Created new user");

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::OtpConfig;
    use crate::db::repositories::{
        SqlxOtpChallengeRepository, SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::sms::InMemorySmsProvider;
    use chrono::Utc;

    const PHONE: &str = "+14155552671";
    const IP: &str = "203.0.113.9";
    const UA: &str = "test-agent";

    struct Harness {
        auth: AuthService,
        sms: Arc<InMemorySmsProvider>,
        clock: Arc<ManualClock>,
    }

    async fn setup() -> Harness {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let sms = Arc::new(InMemorySmsProvider::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let codec = Arc::new(TokenCodec::new("test-secret"));
        let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(pool.clone()));

        let otp = Arc::new(OtpService::new(
            Arc::new(SqlxOtpChallengeRepository::new(pool.clone())),
            sms.clone(),
            clock.clone(),
            OtpConfig::default(),
        ));
        let sessions = Arc::new(SessionService::new(
            Arc::new(SqlxSessionRepository::new(pool)),
            users.clone(),
            codec.clone(),
            clock.clone(),
            SessionConfig::default(),
        ));
        let auth = AuthService::new(
            otp,
            sessions,
            users,
            codec,
            clock.clone(),
            SessionConfig::default(),
        );

        Harness { auth, sms, clock }
    }

    async fn sent_code(h: &Harness, phone: &str) -> String {
        let message = h.sms.last_message(phone).await.expect("No SMS sent");
        message
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect()
    }

    #[tokio::test]
    async fn test_full_login_flow() {
        let h = setup().await;

        h.auth.initiate(PHONE, IP).await.expect("Initiate failed");
        let code = sent_code(&h, PHONE).await;

        let result = h
            .auth
            .verify_and_login(PHONE, &code, IP, UA)
            .await
            .expect("Login failed");

        assert_eq!(result.user.phone, PHONE);
        assert_eq!(result.user.name, "User");
        assert!(result.user.last_login_at.is_some());

        let user = h.auth.validate_token(&result.access_token).await.unwrap();
        assert_eq!(user.id, result.user.id);

        let sessions = h.auth.user_sessions(result.user.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, result.session_id);
    }

    #[tokio::test]
    async fn test_login_reuses_existing_user() {
        let h = setup().await;

        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        let first = h.auth.verify_and_login(PHONE, &code, IP, UA).await.unwrap();

        h.clock.advance(chrono::Duration::minutes(2));
        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        let second = h.auth.verify_and_login(PHONE, &code, IP, UA).await.unwrap();

        assert_eq!(first.user.id, second.user.id);
        assert!(second.user.last_login_at > first.user.last_login_at);
    }

    #[tokio::test]
    async fn test_wrong_code_rejected() {
        let h = setup().await;

        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert!(matches!(
            h.auth.verify_and_login(PHONE, wrong, IP, UA).await,
            Err(AuthError::InvalidOtp)
        ));

        // No user was created for the failed login
        h.clock.advance(chrono::Duration::minutes(2));
        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        let result = h.auth.verify_and_login(PHONE, &code, IP, UA).await.unwrap();
        assert!(result.user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_code_is_single_use_for_login() {
        let h = setup().await;

        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        h.auth.verify_and_login(PHONE, &code, IP, UA).await.unwrap();

        assert!(matches!(
            h.auth.verify_and_login(PHONE, &code, IP, UA).await,
            Err(AuthError::OtpNotFound)
        ));
    }

    #[tokio::test]
    async fn test_refresh_through_orchestrator() {
        let h = setup().await;

        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        let login = h.auth.verify_and_login(PHONE, &code, IP, UA).await.unwrap();

        h.clock.advance(chrono::Duration::minutes(30));
        let refreshed = h
            .auth
            .refresh_token(&login.refresh_token, IP)
            .await
            .unwrap();
        assert_eq!(refreshed.session_id, login.session_id);
        assert_ne!(refreshed.access_token, login.access_token);

        assert!(h.auth.validate_token(&refreshed.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_through_orchestrator() {
        let h = setup().await;

        h.auth.initiate(PHONE, IP).await.unwrap();
        let code = sent_code(&h, PHONE).await;
        let login = h.auth.verify_and_login(PHONE, &code, IP, UA).await.unwrap();

        h.auth.logout(&login.access_token).await.unwrap();
        assert!(h.auth.validate_token(&login.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_initiate_rejects_invalid_phone() {
        let h = setup().await;
        assert!(matches!(
            h.auth.initiate("garbage", IP).await,
            Err(AuthError::PhoneInvalid)
        ));
    }
}
