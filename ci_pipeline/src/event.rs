//! Webhook payload interpretation: push and pull request events.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Pull request actions that produce new code to build.
const ACTIONABLE_PR_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

/// A push (or pull request update) that should be synced, built and tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildEvent {
    pub repo_clone_url: String,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    /// Branch name with any `refs/heads/` prefix removed.
    pub git_ref: Option<String>,
    pub commit_sha: Option<String>,
    pub is_initial_push: bool,
}

impl BuildEvent {
    /// Minimal event for a repository, as produced by a payload that only
    /// carries `repository.clone_url`.
    pub fn for_clone_url(url: impl Into<String>) -> Self {
        Self {
            repo_clone_url: url.into(),
            repo_owner: None,
            repo_name: None,
            git_ref: None,
            commit_sha: None,
            is_initial_push: false,
        }
    }

    pub fn with_owner(mut self, owner: &str, name: &str) -> Self {
        self.repo_owner = Some(owner.to_string());
        self.repo_name = Some(name.to_string());
        self
    }

    pub fn with_ref(mut self, branch: &str) -> Self {
        self.git_ref = Some(normalize_ref(branch).to_string());
        self
    }

    pub fn with_commit(mut self, sha: &str) -> Self {
        self.commit_sha = Some(sha.to_string());
        self
    }

    /// `owner/name` when both are known.
    pub fn full_name(&self) -> Option<String> {
        match (&self.repo_owner, &self.repo_name) {
            (Some(owner), Some(name)) => Some(format!("{owner}/{name}")),
            _ => None,
        }
    }
}

/// Reasons a payload does not become a run. All of them are no-ops for the
/// caller, never error statuses.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload has no repository.clone_url")]
    MissingCloneUrl,

    #[error("event ignored: {0}")]
    Ignored(String),
}

/// Turn a raw webhook body into a [`BuildEvent`].
pub fn parse(raw_body: &[u8]) -> Result<BuildEvent, ParseError> {
    let payload: Value = serde_json::from_slice(raw_body)?;
    if !payload.is_object() {
        return Err(ParseError::MissingCloneUrl);
    }

    if payload.get("pull_request").is_some() {
        parse_pull_request(&payload)
    } else {
        parse_push(&payload)
    }
}

fn parse_push(payload: &Value) -> Result<BuildEvent, ParseError> {
    let clone_url =
        non_empty(&payload["repository"]["clone_url"]).ok_or(ParseError::MissingCloneUrl)?;

    if payload["deleted"].as_bool() == Some(true) {
        return Err(ParseError::Ignored("branch deletion".to_string()));
    }

    let git_ref = non_empty(&payload["ref"]);
    if let Some(r) = git_ref {
        // Tags and other non-branch refs have nothing to check out or pull.
        if r.starts_with("refs/") && !r.starts_with("refs/heads/") {
            return Err(ParseError::Ignored(format!("non-branch ref '{r}'")));
        }
    }

    let before_is_zero = payload["before"]
        .as_str()
        .is_some_and(|sha| !sha.is_empty() && sha.chars().all(|c| c == '0'));

    Ok(BuildEvent {
        repo_clone_url: clone_url.to_string(),
        repo_owner: repo_owner(payload),
        repo_name: non_empty(&payload["repository"]["name"]).map(str::to_string),
        git_ref: git_ref.map(|r| normalize_ref(r).to_string()),
        commit_sha: non_empty(&payload["after"]).map(str::to_string),
        is_initial_push: payload["created"].as_bool() == Some(true) || before_is_zero,
    })
}

fn parse_pull_request(payload: &Value) -> Result<BuildEvent, ParseError> {
    let head = &payload["pull_request"]["head"];
    let clone_url = non_empty(&head["repo"]["clone_url"])
        .or_else(|| non_empty(&payload["repository"]["clone_url"]))
        .ok_or(ParseError::MissingCloneUrl)?;

    if let Some(action) = payload["action"].as_str() {
        if !ACTIONABLE_PR_ACTIONS.contains(&action) {
            return Err(ParseError::Ignored(format!("pull_request action '{action}'")));
        }
    }

    Ok(BuildEvent {
        repo_clone_url: clone_url.to_string(),
        repo_owner: repo_owner(payload),
        repo_name: non_empty(&payload["repository"]["name"]).map(str::to_string),
        git_ref: non_empty(&head["ref"]).map(|r| normalize_ref(r).to_string()),
        commit_sha: non_empty(&head["sha"]).map(str::to_string),
        is_initial_push: false,
    })
}

/// Push payloads carry `owner.name`; most other events only `owner.login`.
fn repo_owner(payload: &Value) -> Option<String> {
    let owner = &payload["repository"]["owner"];
    non_empty(&owner["name"])
        .or_else(|| non_empty(&owner["login"]))
        .map(str::to_string)
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

/// `refs/heads/main` -> `main`; anything else is returned untouched.
pub fn normalize_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_url_only_payload_parses() {
        let event = parse(br#"{"repository":{"clone_url":"https://host/u/r.git"}}"#).unwrap();
        assert_eq!(event, BuildEvent::for_clone_url("https://host/u/r.git"));
    }

    #[test]
    fn full_push_payload_parses() {
        let body = br#"{
            "ref": "refs/heads/main",
            "before": "1111111111111111111111111111111111111111",
            "after": "abc123",
            "repository": {
                "name": "r",
                "clone_url": "https://github.com/u/r.git",
                "owner": {"name": "u", "login": "u-login"}
            }
        }"#;
        let event = parse(body).unwrap();
        assert_eq!(event.git_ref.as_deref(), Some("main"));
        assert_eq!(event.commit_sha.as_deref(), Some("abc123"));
        assert_eq!(event.repo_owner.as_deref(), Some("u"));
        assert_eq!(event.repo_name.as_deref(), Some("r"));
        assert_eq!(event.full_name().as_deref(), Some("u/r"));
        assert!(!event.is_initial_push);
    }

    #[test]
    fn owner_falls_back_to_login() {
        let body = br#"{"repository":{"clone_url":"x","name":"r","owner":{"login":"octo"}}}"#;
        assert_eq!(parse(body).unwrap().repo_owner.as_deref(), Some("octo"));
    }

    #[test]
    fn new_branch_push_is_initial() {
        let created = br#"{"created":true,"repository":{"clone_url":"x"}}"#;
        assert!(parse(created).unwrap().is_initial_push);

        let zero_before = br#"{"before":"0000000000000000000000000000000000000000","repository":{"clone_url":"x"}}"#;
        assert!(parse(zero_before).unwrap().is_initial_push);
    }

    #[test]
    fn malformed_json_is_rejected_without_panicking() {
        let bodies: [&[u8]; 8] = [b"hello", b"", b"{", b"[1,2", b"\xff\xfe", b"null", b"42", b"[]"];
        for body in bodies {
            assert!(parse(body).is_err(), "accepted {:?}", String::from_utf8_lossy(body));
        }
        assert!(matches!(parse(b"hello"), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn missing_clone_url_is_not_actionable() {
        assert!(matches!(parse(b"{}"), Err(ParseError::MissingCloneUrl)));
        assert!(matches!(
            parse(br#"{"repository":{"name":"r"}}"#),
            Err(ParseError::MissingCloneUrl)
        ));
        assert!(matches!(
            parse(br#"{"repository":{"clone_url":""}}"#),
            Err(ParseError::MissingCloneUrl)
        ));
        assert!(matches!(
            parse(br#"{"repository":{"clone_url":42}}"#),
            Err(ParseError::MissingCloneUrl)
        ));
    }

    #[test]
    fn branch_deletion_is_ignored() {
        let body = br#"{"deleted":true,"ref":"refs/heads/gone","repository":{"clone_url":"x"}}"#;
        assert!(matches!(parse(body), Err(ParseError::Ignored(_))));
    }

    #[test]
    fn tag_push_is_ignored() {
        let bodies: [&[u8]; 2] = [
            br#"{"ref":"refs/tags/v1.0","after":"abc","repository":{"clone_url":"x"}}"#,
            br#"{"ref":"refs/notes/commits","repository":{"clone_url":"x"}}"#,
        ];
        for body in bodies {
            assert!(matches!(parse(body), Err(ParseError::Ignored(_))));
        }
    }

    #[test]
    fn pull_request_uses_head_fields() {
        let body = br#"{
            "action": "synchronize",
            "pull_request": {
                "head": {
                    "ref": "feature/login",
                    "sha": "deadbeef",
                    "repo": {"clone_url": "https://github.com/fork/r.git"}
                }
            },
            "repository": {"name": "r", "clone_url": "https://github.com/u/r.git", "owner": {"login": "u"}}
        }"#;
        let event = parse(body).unwrap();
        assert_eq!(event.repo_clone_url, "https://github.com/fork/r.git");
        assert_eq!(event.git_ref.as_deref(), Some("feature/login"));
        assert_eq!(event.commit_sha.as_deref(), Some("deadbeef"));
        assert_eq!(event.repo_owner.as_deref(), Some("u"));
    }

    #[test]
    fn closed_pull_request_is_ignored() {
        let body = br#"{
            "action": "closed",
            "pull_request": {"head": {"repo": {"clone_url": "x"}}}
        }"#;
        assert!(matches!(parse(body), Err(ParseError::Ignored(_))));
    }

    #[test]
    fn normalize_ref_strips_heads_prefix_only() {
        assert_eq!(normalize_ref("refs/heads/main"), "main");
        assert_eq!(normalize_ref("refs/heads/feat/x"), "feat/x");
        assert_eq!(normalize_ref("refs/tags/v1"), "refs/tags/v1");
        assert_eq!(normalize_ref("dev"), "dev");
    }
}
