use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use eyre::WrapErr;

use ci_pipeline::event;
use ci_pipeline::sync::Synchronizer;
use ci_pipeline::{BuildRunner, GitSynchronizer, JobOrchestrator, PipelineConfig, TestRunner};

#[derive(Parser)]
#[command(name = "cihook-pipeline", about = "Run cihook pipeline stages by hand")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the build command and check for the build success marker
    Build {
        #[arg(long)]
        source: PathBuf,
    },
    /// Run the test command and check for the test success marker
    Test {
        #[arg(long)]
        source: PathBuf,
    },
    /// Clone or update the working copy for a webhook payload
    Sync {
        #[arg(long)]
        payload: PathBuf,
    },
    /// Full run for a webhook payload (sync, build, test, report)
    Run {
        #[arg(long)]
        payload: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn read_payload(path: &Path) -> eyre::Result<Vec<u8>> {
    std::fs::read(path).wrap_err_with(|| format!("reading payload {}", path.display()))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();
    let Cli { command } = Cli::parse();
    let config = PipelineConfig::from_env();

    match command {
        Command::Build { source } => {
            let passed = BuildRunner::from_config(&config).build(&source).await;
            println!("[build] {}", if passed { "passed" } else { "failed" });
            if !passed {
                eyre::bail!("build failed");
            }
        }
        Command::Test { source } => {
            let passed = TestRunner::from_config(&config).test(&source).await;
            println!("[test] {}", if passed { "passed" } else { "failed" });
            if !passed {
                eyre::bail!("tests failed");
            }
        }
        Command::Sync { payload } => {
            let event = event::parse(&read_payload(&payload)?)?;
            let orchestrator = JobOrchestrator::from_config(config);
            let path = orchestrator.local_path(&event);
            let result = GitSynchronizer::new().sync(&event, &path).await;
            println!("[sync] {} -> {result:?}", path.display());
            if !result.is_success() {
                eyre::bail!("sync failed");
            }
        }
        Command::Run { payload } => {
            let orchestrator = JobOrchestrator::from_config(config);
            match orchestrator.handle_payload(&read_payload(&payload)?).await {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("Payload is not actionable; nothing to do."),
            }
        }
    }

    Ok(())
}
