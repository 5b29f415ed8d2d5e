//! Webhook Configuration
//!
//! Secrets are loaded from the environment and never logged. Everything
//! else has conservative defaults tuned for Stripe's redelivery behavior
//! (retries spread over several days, 5-minute signature tolerance).

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable holding the Stripe endpoint signing secret.
pub const ENV_STRIPE_SECRET: &str = "STRIPE_WEBHOOK_SECRET";
/// Environment variable holding the Telegram webhook secret token.
pub const ENV_TELEGRAM_SECRET: &str = "TELEGRAM_WEBHOOK_SECRET";

/// Configuration for the webhook intake pipeline.
#[derive(Clone)]
pub struct WebhookConfig {
    /// Stripe endpoint signing secret (`whsec_...`)
    pub signing_secret: String,

    /// Telegram secret token; `None` disables the Telegram endpoint
    pub telegram_secret: Option<String>,

    /// Accepted skew between the signed timestamp and server time
    pub timestamp_tolerance: Duration,

    /// Retry attempts for a failing event before it is marked failed
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    pub retry_base_delay: Duration,

    /// Per-attempt processing timeout
    pub processing_timeout: Duration,

    /// Capacity of the background processing queue
    pub queue_capacity: usize,
}

impl WebhookConfig {
    /// Load configuration from the environment.
    ///
    /// `STRIPE_WEBHOOK_SECRET` is required; `TELEGRAM_WEBHOOK_SECRET` is
    /// optional and gates the Telegram endpoint.
    pub fn from_env() -> Result<Self, ConfigError> {
        let signing_secret = env::var(ENV_STRIPE_SECRET)
            .map_err(|_| ConfigError::MissingEnv(ENV_STRIPE_SECRET))?;
        if signing_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: ENV_STRIPE_SECRET,
                reason: "must not be empty".to_string(),
            });
        }

        let telegram_secret = env::var(ENV_TELEGRAM_SECRET).ok().filter(|s| !s.is_empty());

        Ok(Self {
            signing_secret,
            telegram_secret,
            ..Self::defaults()
        })
    }

    /// Configuration with test secrets and fast timings, for unit and
    /// integration tests.
    pub fn test_config() -> Self {
        Self {
            signing_secret: "whsec_test123secret456".to_string(),
            telegram_secret: Some("tg_test_token".to_string()),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(10),
            processing_timeout: Duration::from_secs(1),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            signing_secret: String::new(),
            telegram_secret: None,
            timestamp_tolerance: Duration::from_secs(300),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            processing_timeout: Duration::from_secs(30),
            queue_capacity: 1024,
        }
    }

    /// Backoff delay before retry `attempt` (0-based): base * 2^attempt,
    /// capped at one minute.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.retry_base_delay
            .saturating_mul(factor)
            .min(Duration::from_secs(60))
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of Debug output and logs.
        f.debug_struct("WebhookConfig")
            .field("telegram_enabled", &self.telegram_secret.is_some())
            .field("timestamp_tolerance", &self.timestamp_tolerance)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("processing_timeout", &self.processing_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let config = WebhookConfig {
            retry_base_delay: Duration::from_secs(1),
            ..WebhookConfig::test_config()
        };
        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_delay_capped() {
        let config = WebhookConfig {
            retry_base_delay: Duration::from_secs(10),
            ..WebhookConfig::test_config()
        };
        assert_eq!(config.retry_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = WebhookConfig::test_config();
        let debug = format!("{config:?}");
        assert!(!debug.contains("whsec_test123secret456"));
        assert!(!debug.contains("tg_test_token"));
    }

    #[test]
    fn test_test_config_has_telegram() {
        let config = WebhookConfig::test_config();
        assert!(config.telegram_secret.is_some());
        assert_eq!(config.timestamp_tolerance, Duration::from_secs(300));
    }
}
