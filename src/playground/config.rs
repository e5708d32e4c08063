//! Playground configuration with builder pattern.

use std::time::Duration;

use crate::playground::limits::ExecutionLimits;

/// Default primary package CDN.
pub const DEFAULT_PRIMARY_CDN: &str = "https://unpkg.com/";

/// Default fallback package CDN mirror.
pub const DEFAULT_FALLBACK_CDN: &str = "https://cdn.jsdelivr.net/npm/";

/// Configuration for a playground instance.
#[derive(Debug, Clone)]
pub struct PlaygroundConfig {
    /// Quiet period after the last edit before a run starts.
    pub debounce: Duration,
    /// Base URL of the primary package CDN (with trailing slash).
    pub primary_cdn: String,
    /// Base URL of the fallback package CDN mirror (with trailing slash).
    pub fallback_cdn: String,
    /// Timeout of a single module fetch.
    pub fetch_timeout: Duration,
    /// Overrides the detected number of parallel hardware units.
    pub parallelism: Option<usize>,
    /// Explicit limits; when set, parallelism-based detection is skipped.
    pub limits: Option<ExecutionLimits>,
    /// Maximum nesting depth rendered by the serializer.
    pub max_depth: usize,
    /// Maximum rendered length of one console argument.
    pub console_max_length: usize,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            primary_cdn: DEFAULT_PRIMARY_CDN.to_string(),
            fallback_cdn: DEFAULT_FALLBACK_CDN.to_string(),
            fetch_timeout: Duration::from_secs(10),
            parallelism: None,
            limits: None,
            max_depth: 10,
            console_max_length: 5_000,
        }
    }
}

impl PlaygroundConfig {
    /// Create a new builder for PlaygroundConfig.
    pub fn builder() -> PlaygroundConfigBuilder {
        PlaygroundConfigBuilder::default()
    }

    /// Limits for the next run.
    pub fn execution_limits(&self) -> ExecutionLimits {
        match self.limits {
            Some(limits) => limits,
            None => ExecutionLimits::for_parallelism(
                self.parallelism
                    .unwrap_or_else(ExecutionLimits::host_parallelism),
            ),
        }
    }
}

/// Builder for creating PlaygroundConfig instances.
#[derive(Debug, Clone, Default)]
pub struct PlaygroundConfigBuilder {
    debounce: Option<Duration>,
    primary_cdn: Option<String>,
    fallback_cdn: Option<String>,
    fetch_timeout: Option<Duration>,
    parallelism: Option<usize>,
    limits: Option<ExecutionLimits>,
    max_depth: Option<usize>,
    console_max_length: Option<usize>,
}

impl PlaygroundConfigBuilder {
    /// Set the debounce interval.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    /// Set the primary CDN base URL.
    pub fn primary_cdn(mut self, url: impl Into<String>) -> Self {
        self.primary_cdn = Some(url.into());
        self
    }

    /// Set the fallback CDN base URL.
    pub fn fallback_cdn(mut self, url: impl Into<String>) -> Self {
        self.fallback_cdn = Some(url.into());
        self
    }

    /// Set the per-request module fetch timeout.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Pretend the host has this many parallel hardware units.
    pub fn parallelism(mut self, units: usize) -> Self {
        self.parallelism = Some(units);
        self
    }

    /// Use fixed execution limits.
    pub fn limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Set the serializer depth bound.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set the serializer length bound for console arguments.
    pub fn console_max_length(mut self, length: usize) -> Self {
        self.console_max_length = Some(length);
        self
    }

    /// Build the PlaygroundConfig.
    pub fn build(self) -> PlaygroundConfig {
        let default = PlaygroundConfig::default();
        PlaygroundConfig {
            debounce: self.debounce.unwrap_or(default.debounce),
            primary_cdn: self.primary_cdn.unwrap_or(default.primary_cdn),
            fallback_cdn: self.fallback_cdn.unwrap_or(default.fallback_cdn),
            fetch_timeout: self.fetch_timeout.unwrap_or(default.fetch_timeout),
            parallelism: self.parallelism.or(default.parallelism),
            limits: self.limits.or(default.limits),
            max_depth: self.max_depth.unwrap_or(default.max_depth),
            console_max_length: self
                .console_max_length
                .unwrap_or(default.console_max_length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlaygroundConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.primary_cdn, "https://unpkg.com/");
        assert_eq!(config.fallback_cdn, "https://cdn.jsdelivr.net/npm/");
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.console_max_length, 5_000);
    }

    #[test]
    fn test_builder() {
        let config = PlaygroundConfig::builder()
            .debounce(Duration::from_millis(50))
            .primary_cdn("http://127.0.0.1:1/")
            .parallelism(8)
            .console_max_length(200)
            .build();

        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.primary_cdn, "http://127.0.0.1:1/");
        assert_eq!(config.fallback_cdn, DEFAULT_FALLBACK_CDN);
        assert_eq!(config.parallelism, Some(8));
        assert_eq!(config.console_max_length, 200);
    }

    #[test]
    fn test_limits_follow_parallelism() {
        let capable = PlaygroundConfig::builder().parallelism(8).build();
        assert_eq!(capable.execution_limits().max_depth, 150);

        let constrained = PlaygroundConfig::builder().parallelism(2).build();
        assert_eq!(constrained.execution_limits().max_depth, 80);
    }

    #[test]
    fn test_explicit_limits_win() {
        let limits = ExecutionLimits {
            timeout: Duration::from_millis(250),
            max_iterations: 10,
            max_depth: 5,
            max_array_size: 100,
        };
        let config = PlaygroundConfig::builder()
            .parallelism(16)
            .limits(limits)
            .build();
        assert_eq!(config.execution_limits(), limits);
    }
}
