//! Pipeline configuration: loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default build command (Maven compile).
pub const DEFAULT_BUILD_COMMAND: &str = "mvn clean compile";
/// Default test command.
pub const DEFAULT_TEST_COMMAND: &str = "mvn test";
/// Line fragment Maven prints when a build succeeds.
pub const DEFAULT_BUILD_MARKER: &str = "BUILD SUCCESS";
/// Surefire summary fragment for a fully green test run.
pub const DEFAULT_TEST_MARKER: &str = "Failures: 0, Errors: 0, Skipped: 0";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Parent directory of every repository working copy.
    pub workspace_dir: PathBuf,
    /// Shell command that builds the project.
    pub build_command: String,
    /// Shell command that runs the test suite.
    pub test_command: String,
    /// Output fragment that marks a successful build.
    pub build_marker: String,
    /// Output fragment that marks a fully passing test run.
    pub test_marker: String,
    /// Also require exit status 0 from build/test commands.
    pub require_exit_success: bool,
    /// Upper bound on each build/test subprocess.
    pub stage_timeout: Duration,
    /// GitHub access token for commit statuses.
    pub github_token: String,
    /// Base URL of the status API.
    pub github_api_url: String,
    /// Report failure/error when the working copy cannot be updated.
    pub report_sync_failures: bool,
    /// Post a `pending` status before building on the update path.
    pub report_pending: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("./workspace"),
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            test_command: DEFAULT_TEST_COMMAND.to_string(),
            build_marker: DEFAULT_BUILD_MARKER.to_string(),
            test_marker: DEFAULT_TEST_MARKER.to_string(),
            require_exit_success: false,
            stage_timeout: Duration::from_secs(600),
            github_token: String::new(),
            github_api_url: "https://api.github.com".to_string(),
            report_sync_failures: true,
            report_pending: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|key| std::env::var(key).ok());

        if config.github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }

        config
    }

    /// Build a config from an arbitrary key lookup; unset or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| {
            lookup(key).filter(|v| !v.is_empty()).unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        let stage_timeout = lookup("CI_STAGE_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.stage_timeout);

        // Stages and git run with other working directories, so the
        // workspace is pinned to an absolute path once, here.
        let workspace_dir = lookup("CI_WORKSPACE_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        let workspace_dir = std::path::absolute(&workspace_dir).unwrap_or(workspace_dir);

        Self {
            workspace_dir,
            build_command: string("CI_BUILD_COMMAND", defaults.build_command),
            test_command: string("CI_TEST_COMMAND", defaults.test_command),
            build_marker: string("CI_BUILD_MARKER", defaults.build_marker),
            test_marker: string("CI_TEST_MARKER", defaults.test_marker),
            require_exit_success: flag("CI_REQUIRE_EXIT_SUCCESS", defaults.require_exit_success),
            stage_timeout,
            github_token: lookup("CI_GITHUB_TOKEN").unwrap_or_default(),
            github_api_url: string("CI_GITHUB_API_URL", defaults.github_api_url)
                .trim_end_matches('/')
                .to_string(),
            report_sync_failures: flag("CI_REPORT_SYNC_FAILURES", defaults.report_sync_failures),
            report_pending: flag("CI_REPORT_PENDING", defaults.report_pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> PipelineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.build_command, "mvn clean compile");
        assert_eq!(config.build_marker, "BUILD SUCCESS");
        assert_eq!(config.test_marker, "Failures: 0, Errors: 0, Skipped: 0");
        assert_eq!(config.stage_timeout, Duration::from_secs(600));
        assert!(config.report_sync_failures);
        assert!(!config.report_pending);
        assert!(config.github_token.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CI_BUILD_COMMAND", "cargo build"),
            ("CI_TEST_MARKER", "test result: ok"),
            ("CI_STAGE_TIMEOUT", "30"),
            ("CI_REPORT_SYNC_FAILURES", "false"),
            ("CI_REQUIRE_EXIT_SUCCESS", "1"),
            ("CI_GITHUB_API_URL", "http://localhost:8080/"),
            ("CI_WORKSPACE_DIR", "/var/lib/cihook"),
        ]);
        assert_eq!(config.build_command, "cargo build");
        assert_eq!(config.test_marker, "test result: ok");
        assert_eq!(config.stage_timeout, Duration::from_secs(30));
        assert!(!config.report_sync_failures);
        assert!(config.require_exit_success);
        assert_eq!(config.github_api_url, "http://localhost:8080");
        assert_eq!(config.workspace_dir, PathBuf::from("/var/lib/cihook"));
    }

    #[test]
    fn unparsable_timeout_falls_back() {
        let config = config_from(&[("CI_STAGE_TIMEOUT", "soon")]);
        assert_eq!(config.stage_timeout, Duration::from_secs(600));
    }

    #[test]
    fn zero_timeout_falls_back() {
        let config = config_from(&[("CI_STAGE_TIMEOUT", "0")]);
        assert_eq!(config.stage_timeout, Duration::from_secs(600));
    }

    #[test]
    fn relative_workspace_is_made_absolute() {
        let config = config_from(&[]);
        assert!(config.workspace_dir.is_absolute());
        assert!(config.workspace_dir.ends_with("workspace"));

        let config = config_from(&[("CI_WORKSPACE_DIR", "ci/work")]);
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.workspace_dir, cwd.join("ci/work"));
    }
}
