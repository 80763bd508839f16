//! SMS delivery providers
//!
//! Outbound message delivery behind a trait so the OTP engine never knows
//! which carrier is wired in. Delivery outcome is a plain bool; transport
//! errors are logged here and collapsed to a failed send.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::config::{SmsBackend, SmsConfig};

/// SMS provider trait
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Send a message to a phone number in E.164 form. Returns whether the
    /// provider accepted the message.
    async fn send_sms(&self, phone: &str, message: &str) -> bool;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// In-memory SMS provider for development and tests. Messages are stored
/// per phone number instead of being delivered.
#[derive(Default)]
pub struct InMemorySmsProvider {
    messages: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemorySmsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent message sent to a phone number
    pub async fn last_message(&self, phone: &str) -> Option<String> {
        self.messages
            .read()
            .await
            .get(phone)
            .and_then(|msgs| msgs.last().cloned())
    }

    /// All messages sent to a phone number, oldest first
    pub async fn all_messages(&self, phone: &str) -> Vec<String> {
        self.messages
            .read()
            .await
            .get(phone)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of messages sent to a phone number
    pub async fn message_count(&self, phone: &str) -> usize {
        self.messages
            .read()
            .await
            .get(phone)
            .map(|msgs| msgs.len())
            .unwrap_or(0)
    }

    /// Drop all stored messages
    pub async fn clear_messages(&self) {
        self.messages.write().await.clear();
    }
}

#[async_trait]
impl SmsProvider for InMemorySmsProvider {
    async fn send_sms(&self, phone: &str, message: &str) -> bool {
        debug!(phone = %phone, "Storing SMS in memory");
        self.messages
            .write()
            .await
            .entry(phone.to_string())
            .or_default()
            .push(message.to_string());
        true
    }

    fn provider_name(&self) -> &'static str {
        "in-memory"
    }
}

/// Twilio SMS provider using the Messages REST endpoint
pub struct TwilioSmsProvider {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSmsProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
            from_number,
        }
    }
}

#[async_trait]
impl SmsProvider for TwilioSmsProvider {
    async fn send_sms(&self, phone: &str, message: &str) -> bool {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let params = [
            ("To", phone),
            ("From", self.from_number.as_str()),
            ("Body", message),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Twilio rejected SMS send");
                false
            }
            Err(e) => {
                error!(error = %e, "Twilio SMS request failed");
                false
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "twilio"
    }
}

/// Build the SMS provider selected by configuration. Falls back to the
/// in-memory provider when Twilio is selected but credentials are missing.
pub fn create_provider(config: &SmsConfig) -> Arc<dyn SmsProvider> {
    match config.provider {
        SmsBackend::Memory => Arc::new(InMemorySmsProvider::new()),
        SmsBackend::Twilio => {
            match (
                config.twilio_account_sid.clone(),
                config.twilio_auth_token.clone(),
                config.twilio_from_number.clone(),
            ) {
                (Some(sid), Some(token), Some(from)) => {
                    Arc::new(TwilioSmsProvider::new(sid, token, from))
                }
                _ => {
                    warn!("Twilio backend selected without credentials, using in-memory provider");
                    Arc::new(InMemorySmsProvider::new())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_stores_messages() {
        let provider = InMemorySmsProvider::new();

        assert!(provider.send_sms("+14155552671", "first").await);
        assert!(provider.send_sms("+14155552671", "second").await);
        assert!(provider.send_sms("+442071838750", "other").await);

        assert_eq!(provider.message_count("+14155552671").await, 2);
        assert_eq!(
            provider.last_message("+14155552671").await.as_deref(),
            Some("second")
        );
        assert_eq!(
            provider.all_messages("+14155552671").await,
            vec!["first".to_string(), "second".to_string()]
        );
        assert_eq!(provider.message_count("+442071838750").await, 1);
    }

    #[tokio::test]
    async fn test_in_memory_clear() {
        let provider = InMemorySmsProvider::new();
        provider.send_sms("+14155552671", "hello").await;
        provider.clear_messages().await;

        assert_eq!(provider.message_count("+14155552671").await, 0);
        assert!(provider.last_message("+14155552671").await.is_none());
    }

    #[test]
    fn test_factory_selects_backend() {
        let memory = create_provider(&SmsConfig {
            provider: SmsBackend::Memory,
            ..Default::default()
        });
        assert_eq!(memory.provider_name(), "in-memory");

        let twilio = create_provider(&SmsConfig {
            provider: SmsBackend::Twilio,
            twilio_account_sid: Some("AC123".to_string()),
            twilio_auth_token: Some("token".to_string()),
            twilio_from_number: Some("+15005550006".to_string()),
        });
        assert_eq!(twilio.provider_name(), "twilio");

        // Missing credentials fall back rather than panic
        let fallback = create_provider(&SmsConfig {
            provider: SmsBackend::Twilio,
            ..Default::default()
        });
        assert_eq!(fallback.provider_name(), "in-memory");
    }
}
