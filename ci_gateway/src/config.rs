//! CI gateway configuration: loaded from environment variables.

use std::time::Duration;

use crate::models::SkipPolicy;
use crate::services::hook_service::RetryPolicy;

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// Application-level secret for installation deliveries.
    pub app_webhook_secret: String,
    /// Verify webhook signatures at all.
    pub webhook_validation: bool,
    /// Fallback token for provider API calls.
    pub github_token: String,
    pub github_api_url: String,
    /// UI base address used for build links.
    pub web_address: String,
    /// Commit status context prefix.
    pub status_context: String,
    /// Attempts for hook and build sequencing.
    pub hook_retry_limit: u32,
    /// Attempt `n` sleeps `n` times this.
    pub hook_retry_backoff: Duration,
    pub skip_bot_senders: bool,
    pub skip_docs_only: bool,
    pub request_timeout: Duration,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            app_webhook_secret: String::new(),
            webhook_validation: true,
            github_token: String::new(),
            github_api_url: "https://api.github.com".to_string(),
            web_address: "http://localhost:9090".to_string(),
            status_context: "centrix-ci".to_string(),
            hook_retry_limit: 3,
            hook_retry_backoff: Duration::from_millis(1000),
            skip_bot_senders: false,
            skip_docs_only: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let app_webhook_secret = std::env::var("CI_APP_WEBHOOK_SECRET").unwrap_or_default();
        let webhook_validation = env_parse("CI_WEBHOOK_VALIDATION", defaults.webhook_validation);
        let github_token = std::env::var("CI_GITHUB_TOKEN").unwrap_or_default();
        let github_api_url =
            std::env::var("CI_GITHUB_API_URL").unwrap_or(defaults.github_api_url);
        let web_address = std::env::var("CI_WEB_ADDRESS")
            .map(|addr| addr.trim_end_matches('/').to_string())
            .unwrap_or(defaults.web_address);
        let status_context =
            std::env::var("CI_STATUS_CONTEXT").unwrap_or(defaults.status_context);
        let hook_retry_limit = env_parse("CI_HOOK_RETRY_LIMIT", defaults.hook_retry_limit).max(1);
        let hook_retry_backoff = Duration::from_millis(env_parse("CI_HOOK_RETRY_BACKOFF_MS", 1000));
        let skip_bot_senders = env_parse("CI_SKIP_BOT_SENDERS", defaults.skip_bot_senders);
        let skip_docs_only = env_parse("CI_SKIP_DOCS_ONLY", defaults.skip_docs_only);
        let request_timeout = Duration::from_secs(env_parse("CI_REQUEST_TIMEOUT_SECS", 30));

        if !webhook_validation {
            tracing::warn!("CI_WEBHOOK_VALIDATION=false -- webhook signatures are not checked");
        }
        if app_webhook_secret.is_empty() {
            tracing::warn!("CI_APP_WEBHOOK_SECRET not set -- installation events will be rejected");
        }
        if github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- provider calls rely on repository owner tokens");
        }

        Self {
            app_webhook_secret,
            webhook_validation,
            github_token,
            github_api_url,
            web_address,
            status_context,
            hook_retry_limit,
            hook_retry_backoff,
            skip_bot_senders,
            skip_docs_only,
            request_timeout,
        }
    }

    pub fn skip_policy(&self) -> SkipPolicy {
        SkipPolicy {
            bot_senders: self.skip_bot_senders,
            docs_only: self.skip_docs_only,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            limit: self.hook_retry_limit,
            backoff: self.hook_retry_backoff,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CiConfig::default();
        assert!(config.webhook_validation);
        assert_eq!(config.hook_retry_limit, 3);
        assert_eq!(config.hook_retry_backoff, Duration::from_secs(1));
        assert_eq!(config.web_address, "http://localhost:9090");
        assert_eq!(config.status_context, "centrix-ci");
    }

    #[test]
    fn policies_follow_flags() {
        let config = CiConfig {
            skip_docs_only: true,
            hook_retry_limit: 5,
            ..CiConfig::default()
        };
        let skip = config.skip_policy();
        assert!(skip.docs_only);
        assert!(!skip.bot_senders);
        assert_eq!(config.retry_policy().limit, 5);
    }

    #[test]
    fn unparsable_values_fall_back() {
        assert_eq!(env_parse("CI_TEST_SURELY_UNSET_VARIABLE", 7u32), 7);
    }
}
