// selfheal-gateway-rs/src/config.rs
//
// Environment-driven configuration. Every knob has a default so the
// gateway starts with nothing but a Redis instance and an upstream.
//
// Configuration (.env file or process environment):
// - SELFHEAL_PORT: HTTP bind port (default: 8080)
// - REDIS_URL: Redis connection string (default: redis://127.0.0.1:6379)
// - EXTERNAL_API_BASE_URL: upstream base URL (default: http://localhost:8081)
// - SELFHEAL_FAILURE_STREAM: failure-event stream key (default: selfheal:failures)
// - SELFHEAL_CONSUMER_GROUP: learner consumer group (default: selfheal-learners)
// - SELFHEAL_BLOCK_MS: learner blocking-read timeout (default: 5000)
// - SELFHEAL_UPSTREAM_TIMEOUT_MS: default upstream call timeout (default: 10000)
// - OPENAI_API_KEY: enables the LLM-backed proposer when set
// - OPENAI_API_URL: LLM provider base URL (default: https://api.openai.com/v1)
// - OPENAI_MODEL: model name (default: gpt-4o-mini)

use std::env;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub redis_url: String,
    pub upstream_base_url: String,
    pub failure_stream: String,
    pub consumer_group: String,
    pub block_ms: u64,
    pub upstream_timeout_ms: u64,
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_model: String,
}

impl GatewayConfig {
    /// Read configuration from the environment. Never panics: malformed
    /// numeric values fall back to their defaults.
    pub fn from_env() -> Self {
        let base_url = env::var("EXTERNAL_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());

        Self {
            port: parse_var("SELFHEAL_PORT", 8080),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            upstream_base_url: normalize_base_url(&base_url),
            failure_stream: env::var("SELFHEAL_FAILURE_STREAM")
                .unwrap_or_else(|_| "selfheal:failures".to_string()),
            consumer_group: env::var("SELFHEAL_CONSUMER_GROUP")
                .unwrap_or_else(|_| "selfheal-learners".to_string()),
            block_ms: parse_var("SELFHEAL_BLOCK_MS", 5000),
            upstream_timeout_ms: parse_var("SELFHEAL_UPSTREAM_TIMEOUT_MS", 10_000),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            openai_api_url: env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Trim the base URL and drop any trailing slash so URL joins stay
/// consistent, downgrading localhost HTTPS along the way.
fn normalize_base_url(url: &str) -> String {
    normalize_local_https(url.trim().trim_end_matches('/'), "EXTERNAL_API_BASE_URL")
}

/// Local servers rarely carry certificates; an https://localhost base URL
/// is almost always a typo that would fail the TLS handshake. Downgrade
/// it to plain HTTP and warn so the operator knows the URL was changed.
pub fn normalize_local_https(url: &str, source: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("https://localhost") || trimmed.starts_with("https://127.0.0.1") {
        let fixed = format!("http://{}", &trimmed["https://".len()..]);
        warn!(source, from = trimmed, to = %fixed, "downgrading localhost HTTPS to HTTP");
        return fixed;
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        assert_eq!(normalize_base_url("http://api.vendor.com/"), "http://api.vendor.com");
    }

    #[test]
    fn localhost_https_is_downgraded() {
        assert_eq!(
            normalize_local_https("https://localhost:8081/", "test"),
            "http://localhost:8081"
        );
        assert_eq!(
            normalize_local_https("https://127.0.0.1:9000", "test"),
            "http://127.0.0.1:9000"
        );
    }

    #[test]
    fn remote_https_is_untouched() {
        assert_eq!(
            normalize_local_https("https://api.vendor.com", "test"),
            "https://api.vendor.com"
        );
    }
}
