#![forbid(unsafe_code)]

//! Pull requests over the GitHub REST API.

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::core::naming;
use crate::error::CodeforgeError;

const USER_AGENT: &str = concat!("codeforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    html_url: String,
}

impl GitHubClient {
    /// `api_base` is usually `https://api.github.com`; overridable for
    /// GitHub Enterprise and for tests.
    #[must_use]
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Opens a PR and returns its URL.
    ///
    /// Without a token this cannot call the API; it falls back to the
    /// compare URL so the caller still gets a link a human can open.
    pub async fn create_pull_request(
        &self,
        repo_url: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, CodeforgeError> {
        let repo = naming::parse_origin_url(repo_url).ok_or_else(|| {
            CodeforgeError::collaborator("github", format!("unparseable repo url '{repo_url}'"))
        })?;

        let Some(token) = &self.token else {
            warn!(repo = %repo.full_name(), "no API token; returning compare URL");
            return Ok(format!(
                "https://{}/{}/compare/{base}...{head}",
                repo.host,
                repo.full_name()
            ));
        };

        let url = format!("{}/repos/{}/pulls", self.api_base, repo.full_name());
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&json!({
                "title": title,
                "body": body,
                "head": head,
                "base": base,
            }))
            .send()
            .await
            .map_err(|e| CodeforgeError::collaborator("github", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CodeforgeError::collaborator(
                "github",
                format!("pull request creation returned {status}: {detail}"),
            ));
        }

        let pull: PullResponse = response
            .json()
            .await
            .map_err(|e| CodeforgeError::collaborator("github", e))?;
        Ok(pull.html_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_compare_url_without_token() {
        let client = GitHubClient::new("https://api.github.com", None);
        let url = client
            .create_pull_request(
                "git@github.com:acme/market-predictor.git",
                "status-endpoint-a1b2c3d4",
                "main",
                "feat: add status endpoint",
                "body",
            )
            .await
            .expect("compare url");
        assert_eq!(
            url,
            "https://github.com/acme/market-predictor/compare/main...status-endpoint-a1b2c3d4"
        );
    }

    #[tokio::test]
    async fn rejects_unparseable_repo_url() {
        let client = GitHubClient::new("https://api.github.com", Some("t".to_owned()));
        let err = client
            .create_pull_request("not a url", "head", "main", "t", "b")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unparseable"));
    }
}
