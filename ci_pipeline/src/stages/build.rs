use std::path::Path;

use async_trait::async_trait;

use super::{event_env, StageCommand, StageOutcome, StageRunner};
use crate::config::PipelineConfig;
use crate::event::BuildEvent;

/// Runs the project's build command and looks for the build success marker.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    command: StageCommand,
}

impl BuildRunner {
    pub fn new(command: StageCommand) -> Self {
        Self { command }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(StageCommand {
            name: "build",
            command: config.build_command.clone(),
            success_marker: config.build_marker.clone(),
            timeout: config.stage_timeout,
            require_exit_success: config.require_exit_success,
        })
    }

    /// `true` iff the build printed its success marker. Spawn and IO
    /// failures are logged and count as a failed build.
    pub async fn build(&self, local_path: &Path) -> bool {
        self.execute(local_path, &[]).await.is_success()
    }

    async fn execute(&self, local_path: &Path, env: &[(&str, &str)]) -> StageOutcome {
        match self.command.execute(local_path, env).await {
            Ok(output) if self.command.passed(&output) => {
                tracing::info!(duration_ms = output.duration_ms, "Build succeeded");
                StageOutcome::Success
            }
            Ok(output) => {
                let reason = if output.marker_seen {
                    format!("build exited with {}", output.status)
                } else {
                    format!("'{}' not found in build output", self.command.success_marker)
                };
                tracing::warn!(duration_ms = output.duration_ms, "Build failed: {reason}");
                StageOutcome::Failure(reason)
            }
            Err(e) => {
                tracing::error!("Build could not run: {e}");
                StageOutcome::Failure(e.to_string())
            }
        }
    }
}

#[async_trait]
impl StageRunner for BuildRunner {
    fn name(&self) -> &'static str {
        "build"
    }

    async fn run(&self, local_path: &Path, event: &BuildEvent) -> StageOutcome {
        self.execute(local_path, &event_env(event)).await
    }
}
