//! Shared fixtures: scratch git origins and a fake commit-status API.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tempfile::TempDir;

/// Run git in `dir` with a throwaway identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .output()
        .expect("git is installed");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A non-bare repository playing the remote, with `main` checked out.
pub struct Origin {
    pub dir: TempDir,
}

impl Origin {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "--quiet"]);
        git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        let origin = Self { dir };
        origin.commit_file("README.md", "hello\n", "Initial commit");
        origin
    }

    pub fn url(&self) -> String {
        self.dir.path().to_string_lossy().to_string()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `name` on the checked-out branch and commit it; returns the SHA.
    pub fn commit_file(&self, name: &str, contents: &str, message: &str) -> String {
        std::fs::write(self.path().join(name), contents).unwrap();
        git(self.path(), &["add", name]);
        git(self.path(), &["commit", "--quiet", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> String {
        git(self.path(), &["rev-parse", "HEAD"])
    }

    pub fn checkout_new_branch(&self, branch: &str) {
        git(self.path(), &["checkout", "--quiet", "-b", branch]);
    }

    pub fn checkout(&self, branch: &str) {
        git(self.path(), &["checkout", "--quiet", branch]);
    }
}

#[derive(Debug, Clone)]
pub struct StatusRequest {
    pub owner: String,
    pub repo: String,
    pub sha: String,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct ApiState {
    requests: Arc<Mutex<Vec<StatusRequest>>>,
}

async fn record_status(
    State(state): State<ApiState>,
    UrlPath((owner, repo, sha)): UrlPath<(String, String, String)>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.requests.lock().unwrap().push(StatusRequest {
        owner,
        repo,
        sha,
        body,
    });
    StatusCode::CREATED
}

/// Local stand-in for the status API, answering 201 to every POST.
pub struct FakeStatusApi {
    pub url: String,
    requests: Arc<Mutex<Vec<StatusRequest>>>,
}

impl FakeStatusApi {
    pub async fn start() -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/repos/{owner}/{repo}/statuses/{sha}", post(record_status))
            .with_state(ApiState {
                requests: requests.clone(),
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<StatusRequest> {
        self.requests.lock().unwrap().clone()
    }
}
