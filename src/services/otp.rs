//! OTP challenge engine
//!
//! Issues one-time codes over SMS and verifies them against the stored
//! challenge. Every verification attempt is charged before the code is
//! compared, so a wrong guess and a lost race cost the same. Codes are
//! stored only as a keyed digest and never logged.

use chrono::Duration;
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::OtpConfig;
use crate::db::repositories::OtpChallengeRepository;
use crate::error::AuthError;
use crate::models::OtpChallenge;
use crate::services::phone;
use crate::sms::SmsProvider;

type HmacSha256 = Hmac<Sha256>;

/// OTP challenge engine
pub struct OtpService {
    challenges: Arc<dyn OtpChallengeRepository>,
    sms: Arc<dyn SmsProvider>,
    clock: Arc<dyn Clock>,
    config: OtpConfig,
}

impl OtpService {
    pub fn new(
        challenges: Arc<dyn OtpChallengeRepository>,
        sms: Arc<dyn SmsProvider>,
        clock: Arc<dyn Clock>,
        config: OtpConfig,
    ) -> Self {
        Self {
            challenges,
            sms,
            clock,
            config,
        }
    }

    /// Generate a code, persist the challenge and send it over SMS.
    ///
    /// The challenge row is written before the SMS goes out, so a failed
    /// delivery still counts against the sender's rate limits.
    pub async fn send(&self, phone_number: &str, client_ip: &str) -> Result<(), AuthError> {
        let normalized = phone::normalize_to_e164(phone_number)?;

        info!(phone = %phone::mask(&normalized), "Sending OTP");

        self.check_rate_limits(&normalized, client_ip).await?;

        let code = self.generate_code();
        let code_hash = hash_code(&self.config.hash_key, &code);

        let challenge = OtpChallenge::new(
            normalized.clone(),
            code_hash,
            client_ip.to_string(),
            self.clock.now(),
            self.config.expiry_minutes,
        );
        self.challenges.create(&challenge).await?;

        let message = format!(
            "Your verification code is: {}. Valid for {} minutes.",
            code, self.config.expiry_minutes
        );

        if !self.sms.send_sms(&normalized, &message).await {
            warn!(phone = %phone::mask(&normalized), "OTP SMS delivery failed");
            return Err(AuthError::SmsSendFailed);
        }

        info!(phone = %phone::mask(&normalized), "OTP sent");
        Ok(())
    }

    /// Verify a code against the latest unconsumed challenge for the phone.
    ///
    /// Returns `Ok(true)` when the code matched and the challenge was
    /// consumed, `Ok(false)` when the code was wrong or another verify
    /// consumed the challenge first.
    pub async fn verify(
        &self,
        phone_number: &str,
        code: &str,
        _client_ip: &str,
    ) -> Result<bool, AuthError> {
        let normalized = phone::normalize_to_e164(phone_number)?;
        let masked = phone::mask(&normalized);

        let challenge = self
            .challenges
            .find_latest_unconsumed(&normalized)
            .await?
            .ok_or_else(|| {
                warn!(phone = %masked, "No active OTP challenge");
                AuthError::OtpNotFound
            })?;

        let now = self.clock.now();
        if challenge.is_expired(now) {
            warn!(phone = %masked, "OTP challenge expired");
            return Err(AuthError::OtpExpired);
        }

        if challenge.attempt_count >= self.config.max_attempts {
            warn!(phone = %masked, "OTP attempt limit reached");
            return Err(AuthError::OtpAttemptsExceeded);
        }

        // Charge the attempt before comparing. The guard re-checks the cap
        // and the unconsumed state, so a concurrent verify cannot slip an
        // extra attempt past the limit.
        if !self
            .challenges
            .increment_attempts(challenge.id, self.config.max_attempts)
            .await?
        {
            warn!(phone = %masked, "OTP attempt charge rejected");
            return Err(AuthError::OtpAttemptsExceeded);
        }

        let provided_hash = hash_code(&self.config.hash_key, code);
        if provided_hash != challenge.code_hash {
            warn!(phone = %masked, "Invalid OTP provided");
            return Ok(false);
        }

        // Only one verify may consume the challenge
        if !self.challenges.mark_consumed(challenge.id, now).await? {
            warn!(phone = %masked, "OTP challenge consumed concurrently");
            return Ok(false);
        }

        info!(phone = %masked, "OTP verified");
        Ok(true)
    }

    /// Whether the phone has a challenge that could still be verified
    pub async fn has_valid_otp(&self, phone_number: &str) -> Result<bool, AuthError> {
        let normalized = phone::normalize_to_e164(phone_number)?;

        let challenge = self.challenges.find_latest_unconsumed(&normalized).await?;
        let now = self.clock.now();

        Ok(challenge
            .map(|c| !c.is_expired(now) && c.attempt_count < self.config.max_attempts)
            .unwrap_or(false))
    }

    /// Delete challenges past their expiry, returning how many were removed
    pub async fn cleanup_expired_challenges(&self) -> Result<u64, AuthError> {
        let deleted = self.challenges.delete_expired(self.clock.now()).await?;
        info!(deleted, "Cleaned up expired OTP challenges");
        Ok(deleted)
    }

    async fn check_rate_limits(&self, phone: &str, client_ip: &str) -> Result<(), AuthError> {
        let now = self.clock.now();
        let hour_ago = now - Duration::hours(1);
        let cooldown_start = now - Duration::minutes(self.config.rate_limit_minutes);
        let minute_ago = now - Duration::minutes(1);

        let hourly = self.challenges.count_by_phone_since(phone, hour_ago).await?;
        if hourly >= self.config.max_per_hour {
            warn!(phone = %phone::mask(phone), count = hourly, "Hourly OTP limit reached");
            return Err(AuthError::RateLimitExceeded);
        }

        let recent = self
            .challenges
            .count_by_phone_since(phone, cooldown_start)
            .await?;
        if recent > 0 {
            warn!(phone = %phone::mask(phone), "OTP cooldown in effect");
            return Err(AuthError::RateLimitExceeded);
        }

        let from_ip = self.challenges.count_by_ip_since(client_ip, minute_ago).await?;
        if from_ip >= self.config.max_per_ip_per_minute {
            warn!(client_ip = %client_ip, count = from_ip, "Per-IP OTP limit reached");
            return Err(AuthError::RateLimitExceeded);
        }

        Ok(())
    }

    fn generate_code(&self) -> String {
        let min = 10u32.pow(self.config.length - 1);
        let max = 10u32.pow(self.config.length) - 1;
        rand::thread_rng().gen_range(min..=max).to_string()
    }
}

/// Keyed digest of an OTP code for at-rest storage
fn hash_code(key: &str, code: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(code.as_bytes());
    HEXLOWER.encode(&mac.finalize().into_bytes())
}
