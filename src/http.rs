//! HTTP client factory for outbound calls. LLM vendors get their own
//! client on the longer timeout; Stripe, FCM, relays and OAuth share one on
//! the default.

use reqwest::Client;
use std::time::Duration;

/// Default timeout for vendor API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for LLM completions.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a client with the default timeout.
pub fn create_client() -> reqwest::Result<Client> {
    create_client_with_timeout(DEFAULT_TIMEOUT)
}

/// Build a client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("roady/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_client() {
        assert!(create_client().is_ok());
    }

    #[test]
    fn builds_client_with_custom_timeout() {
        assert!(create_client_with_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn timeouts_are_ordered() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(30));
        assert!(LONG_TIMEOUT > DEFAULT_TIMEOUT);
    }

    #[test]
    fn only_llm_calls_get_the_long_timeout() {
        let config = crate::config::Config::default();
        assert_eq!(Duration::from_secs(config.llm.timeout_secs), LONG_TIMEOUT);
    }
}
