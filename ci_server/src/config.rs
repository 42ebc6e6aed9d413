//! Server configuration: loaded from environment variables.

use ci_pipeline::PipelineConfig;

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// Maximum number of runs executing at once.
    pub max_concurrent_builds: usize,
    /// Events that may wait for a free worker before new ones are rejected.
    pub queue_capacity: usize,
    /// Settings handed to every pipeline run.
    pub pipeline: PipelineConfig,
}

impl CiConfig {
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|key| std::env::var(key).ok());

        if config.github_webhook_secret.is_empty() {
            tracing::warn!("CI_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if config.pipeline.github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }

        config
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_webhook_secret = lookup("CI_WEBHOOK_SECRET").unwrap_or_default();
        let max_concurrent_builds = lookup("CI_MAX_CONCURRENT")
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(2);
        let queue_capacity = lookup("CI_QUEUE_CAPACITY")
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(32);

        Self {
            github_webhook_secret,
            max_concurrent_builds,
            queue_capacity,
            pipeline: PipelineConfig::from_lookup(lookup),
        }
    }
}
