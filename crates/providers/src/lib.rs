//! Reasoning-service clients for droidloop.
//!
//! All providers implement the `droidloop_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;

use droidloop_config::ProviderConfig;
use std::time::Duration;

/// Build the configured provider.
///
/// Returns `None` when no API key is available.
pub fn from_config(config: &ProviderConfig) -> Option<AnthropicProvider> {
    let key = config.api_key.as_deref()?.trim();
    if key.is_empty() {
        return None;
    }
    Some(
        AnthropicProvider::new(key)
            .with_base_url(&config.base_url)
            .with_timeout(Duration::from_secs(config.timeout_secs)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_requires_api_key() {
        let mut config = ProviderConfig::default();
        assert!(from_config(&config).is_none());

        config.api_key = Some("sk-ant-test".into());
        let provider = from_config(&config).unwrap();
        assert_eq!(droidloop_core::Provider::name(&provider), "anthropic");
    }
}
