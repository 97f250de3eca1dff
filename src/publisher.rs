use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::process::redact;
use crate::repo::parse_remote_url;
use crate::schema::AnalysisResult;

pub const GITHUB_API_URL: &str = "https://api.github.com";
const MAX_TITLE_CHARS: usize = 250;
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub url: String,
}

pub trait PullRequestPublisher {
    /// Open a pull request from `branch` into `base`. Returns its URL.
    fn submit(&self, branch: &str, base: &str, title: &str, body: &str) -> Result<SubmitResult>;
}

/// `Fix: <root cause>` on a single line, truncated to a size GitHub accepts.
pub fn pull_request_title(analysis: &AnalysisResult) -> String {
    let first_line = analysis.root_cause.lines().next().unwrap_or_default().trim();
    let title = format!("Fix: {first_line}");
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }
    let mut cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

pub fn pull_request_body(analysis: &AnalysisResult) -> String {
    format!("Details: {}", analysis.proposed_fix_details.trim())
}

// ---------------------------------------------------------------------------
// Client abstraction (for testability)
// ---------------------------------------------------------------------------

/// Raw HTTP outcome: any status the server answered with.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

pub trait GitHubApi {
    fn post_json(&self, url: &str, token: &str, body: &serde_json::Value) -> Result<ApiResponse>;
}

pub struct UreqGitHubApi {
    timeout: Duration,
}

impl UreqGitHubApi {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl GitHubApi for UreqGitHubApi {
    fn post_json(&self, url: &str, token: &str, body: &serde_json::Value) -> Result<ApiResponse> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let result = agent
            .post(url)
            .set("Accept", "application/vnd.github+json")
            .set("Authorization", &format!("Bearer {token}"))
            .set("User-Agent", "patchiq")
            .set("X-GitHub-Api-Version", "2022-11-28")
            .send_json(body);

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => {
                return Err(Error::PullRequestCreationFailed(format!(
                    "request to GitHub failed: {}",
                    redact(&e.to_string(), &[token.to_string()])
                )));
            }
        };
        let status = response.status();
        let body = response.into_string().map_err(|e| {
            Error::PullRequestCreationFailed(format!("failed to read GitHub response: {e}"))
        })?;
        Ok(ApiResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CreatePrRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct CreatePrResponse {
    html_url: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Pull requests through the GitHub REST API.
pub struct GitHubPublisher<C: GitHubApi = UreqGitHubApi> {
    client: C,
    api_base: String,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubPublisher<UreqGitHubApi> {
    /// Target the repository named by `repo_url`.
    pub fn from_repo_url(repo_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let (owner, repo) = parse_remote_url(repo_url).ok_or_else(|| {
            Error::ConfigValidation(format!(
                "cannot determine owner/repo from repo_url {}",
                redact(repo_url, &[token.to_string()])
            ))
        })?;
        Ok(Self::with_client(
            UreqGitHubApi::new(timeout),
            GITHUB_API_URL,
            &owner,
            &repo,
            token,
        ))
    }
}

impl<C: GitHubApi> GitHubPublisher<C> {
    pub fn with_client(client: C, api_base: &str, owner: &str, repo: &str, token: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/repos/{}/{}/pulls", self.api_base, self.owner, self.repo)
    }

    fn failure_detail(&self, response: &ApiResponse) -> String {
        if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&response.body) {
            let detail = api_error
                .errors
                .iter()
                .find_map(|e| e.message.clone())
                .unwrap_or_default();
            let msg = if detail.is_empty() {
                api_error.message
            } else {
                format!("{}: {detail}", api_error.message)
            };
            return redact(&msg, std::slice::from_ref(&self.token));
        }
        sanitize_error_body(&redact(&response.body, std::slice::from_ref(&self.token)))
    }
}

impl<C: GitHubApi> PullRequestPublisher for GitHubPublisher<C> {
    fn submit(&self, branch: &str, base: &str, title: &str, body: &str) -> Result<SubmitResult> {
        let request = CreatePrRequest {
            title,
            head: branch,
            base,
            body,
        };
        let payload = serde_json::to_value(&request)
            .map_err(|e| Error::PullRequestCreationFailed(e.to_string()))?;

        let response = self.client.post_json(&self.endpoint(), &self.token, &payload)?;

        if !matches!(response.status, 200 | 201) {
            return Err(Error::PullRequestCreationFailed(format!(
                "GitHub API returned HTTP {}: {}",
                response.status,
                self.failure_detail(&response)
            )));
        }

        let created: CreatePrResponse = serde_json::from_str(&response.body).map_err(|e| {
            Error::PullRequestCreationFailed(format!("failed to parse PR response: {e}"))
        })?;
        let url = created
            .html_url
            .or(created.url)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                Error::PullRequestCreationFailed("PR response carried no URL".to_string())
            })?;

        info!(branch, base, url = %url, "opened pull request");
        Ok(SubmitResult { url })
    }
}

/// Truncate an unstructured error body and drop it entirely when it looks
/// like it may carry credentials.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "ghu_",
        "github_pat_",
    ];

    let lower = body.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(error details redacted)".to_string();
    }

    let mut chars = body.chars();
    let head: String = chars.by_ref().take(MAX_ERROR_BODY_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}... (truncated)")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MockGitHubApi {
        responses: RefCell<Vec<Result<ApiResponse>>>,
        requests: RefCell<Vec<(String, serde_json::Value)>>,
    }

    impl MockGitHubApi {
        fn new(responses: Vec<Result<ApiResponse>>) -> Self {
            Self {
                responses: RefCell::new(responses),
                requests: RefCell::new(vec![]),
            }
        }
    }

    impl GitHubApi for MockGitHubApi {
        fn post_json(
            &self,
            url: &str,
            _token: &str,
            body: &serde_json::Value,
        ) -> Result<ApiResponse> {
            self.requests
                .borrow_mut()
                .push((url.to_string(), body.clone()));
            self.responses.borrow_mut().remove(0)
        }
    }

    fn ok(status: u16, body: &str) -> Result<ApiResponse> {
        Ok(ApiResponse {
            status,
            body: body.to_string(),
        })
    }

    fn publisher(responses: Vec<Result<ApiResponse>>) -> GitHubPublisher<MockGitHubApi> {
        GitHubPublisher::with_client(
            MockGitHubApi::new(responses),
            "https://api.github.com/",
            "acme",
            "app",
            "ghp_secret",
        )
    }

    fn analysis(root_cause: &str) -> AnalysisResult {
        AnalysisResult {
            root_cause: root_cause.into(),
            proposed_fix_details: " guard days == 0 ".into(),
            file_path: "app/calc.py".into(),
        }
    }

    #[test]
    fn test_submit_posts_expected_payload() {
        let p = publisher(vec![ok(
            201,
            r#"{"html_url":"https://github.com/acme/app/pull/7","url":"https://api.github.com/repos/acme/app/pulls/7"}"#,
        )]);
        let result = p
            .submit("fix/calc_20260102_030405", "main", "Fix: x", "Details: y")
            .unwrap();
        assert_eq!(result.url, "https://github.com/acme/app/pull/7");

        let requests = p.client.requests.borrow();
        assert_eq!(requests[0].0, "https://api.github.com/repos/acme/app/pulls");
        assert_eq!(requests[0].1["head"], "fix/calc_20260102_030405");
        assert_eq!(requests[0].1["base"], "main");
        assert_eq!(requests[0].1["title"], "Fix: x");
        assert_eq!(requests[0].1["body"], "Details: y");
    }

    #[test]
    fn test_status_200_with_only_url_is_accepted() {
        let p = publisher(vec![ok(200, r#"{"url":"https://api/pulls/1"}"#)]);
        assert_eq!(
            p.submit("b", "main", "t", "d").unwrap().url,
            "https://api/pulls/1"
        );
    }

    #[test]
    fn test_missing_url_is_failure() {
        let p = publisher(vec![ok(201, r#"{"number": 3}"#)]);
        let err = p.submit("b", "main", "t", "d").unwrap_err();
        assert!(matches!(err, Error::PullRequestCreationFailed(_)));
    }

    #[test]
    fn test_unprocessable_reports_structured_detail() {
        let p = publisher(vec![ok(
            422,
            r#"{"message":"Validation Failed","errors":[{"message":"A pull request already exists for acme:fix/x."}]}"#,
        )]);
        let err = p.submit("fix/x", "main", "t", "d").unwrap_err().to_string();
        assert!(err.contains("HTTP 422"));
        assert!(err.contains("Validation Failed: A pull request already exists"));
    }

    #[test]
    fn test_unstructured_error_body_is_sanitized() {
        let p = publisher(vec![ok(500, "upstream said: bad token ghp_secret")]);
        let err = p.submit("b", "main", "t", "d").unwrap_err().to_string();
        assert!(err.contains("HTTP 500"));
        assert!(!err.contains("ghp_secret"));
        assert!(err.contains("redacted"));
    }

    #[test]
    fn test_transport_error_propagates() {
        let p = publisher(vec![Err(Error::PullRequestCreationFailed(
            "connection refused".into(),
        ))]);
        assert!(p.submit("b", "main", "t", "d").is_err());
    }

    #[test]
    fn test_title_and_body() {
        let a = analysis("days may be zero\nsecond line");
        assert_eq!(pull_request_title(&a), "Fix: days may be zero");
        assert_eq!(pull_request_body(&a), "Details: guard days == 0");
    }

    #[test]
    fn test_long_title_is_truncated() {
        let title = pull_request_title(&analysis(&"x".repeat(400)));
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_from_repo_url_requires_owner_and_repo() {
        let err = GitHubPublisher::from_repo_url("file:///tmp/x.git", "t", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConfigValidation(_)));
        let ok = GitHubPublisher::from_repo_url(
            "https://github.com/acme/app.git",
            "t",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(ok.endpoint(), "https://api.github.com/repos/acme/app/pulls");
    }
}
