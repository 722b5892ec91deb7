use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::json;

use decant_common::types::{
    domain_of, ContentKind, ExtractOptions, Extraction, ExtractionMetadata, ExtractionMethod,
};
use decant_common::DecantError;

use super::Extractor;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "decant-import/0.1";

/// Truncation bound for embedded README content.
const README_MAX_CHARS: usize = 20_000;

pub struct GithubExtractor;

impl Extractor for GithubExtractor {
    fn content_kind(&self) -> ContentKind {
        ContentKind::Github
    }

    fn requires_api_key(&self) -> bool {
        // Unauthenticated requests work within GitHub's public quota.
        false
    }

    fn can_handle(&self, url: &str) -> bool {
        owner_repo(url).is_some()
    }

    fn extract<'a>(
        &'a self,
        http: &'a reqwest::Client,
        url: &'a str,
        opts: &'a ExtractOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, DecantError>> + Send + 'a>> {
        Box::pin(async move {
            let (owner, repo) = owner_repo(url)
                .ok_or_else(|| DecantError::UrlInvalid(format!("No owner/repo in {}", url)))?;

            let repo_data = fetch_repo(http, url, &owner, &repo, opts).await?;

            // README failures degrade silently — the repo payload stands.
            let readme = fetch_readme(http, &owner, &repo, opts).await;

            let mut data = serde_json::Map::new();
            data.insert("owner".into(), json!(owner));
            data.insert("repo".into(), json!(repo));
            data.insert("fullName".into(), json!(repo_data.full_name));
            data.insert("url".into(), json!(url));
            data.insert("title".into(), json!(repo_data.full_name));
            if let Some(description) = repo_data.description {
                data.insert("description".into(), json!(description));
            }
            data.insert("stars".into(), json!(repo_data.stargazers_count));
            data.insert("forks".into(), json!(repo_data.forks_count));
            if let Some(language) = repo_data.language {
                data.insert("language".into(), json!(language));
            }
            if !repo_data.topics.is_empty() {
                data.insert("topics".into(), json!(repo_data.topics));
            }
            if let Some(license) = repo_data.license.and_then(|l| l.spdx_id) {
                data.insert("license".into(), json!(license));
            }
            if let Some(homepage) = repo_data.homepage.filter(|h| !h.is_empty()) {
                data.insert("homepage".into(), json!(homepage));
            }
            data.insert("defaultBranch".into(), json!(repo_data.default_branch));
            data.insert("updatedAt".into(), json!(repo_data.updated_at));
            if let Some(avatar) = repo_data.owner.map(|o| o.avatar_url) {
                data.insert("logoUrl".into(), json!(avatar));
            }
            if let Some(readme) = readme {
                let truncated: String = readme.chars().take(README_MAX_CHARS).collect();
                data.insert("readme".into(), json!(truncated));
            }
            data.insert("sourceDomain".into(), json!(domain_of(url)));

            let mut metadata = ExtractionMetadata::new(ExtractionMethod::ApiStandard, 1.0);
            metadata.api_used = Some("github_rest_v3".into());

            Ok(Extraction {
                content_kind: ContentKind::Github,
                data,
                metadata,
            })
        })
    }
}

async fn fetch_repo(
    http: &reqwest::Client,
    url: &str,
    owner: &str,
    repo: &str,
    opts: &ExtractOptions,
) -> Result<RepoResponse, DecantError> {
    let mut request = http
        .get(format!("{}/repos/{}/{}", API_BASE, owner, repo))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github+json");
    if let Some(token) = opts.github_token.as_deref() {
        request = request.bearer_auth(token);
    }
    if let Some(timeout) = opts.timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DecantError::NetworkTimeout(e.to_string())
        } else {
            DecantError::FetchFailed {
                message: e.to_string(),
                status: None,
                retry_after: None,
            }
        }
    })?;

    let status = response.status().as_u16();
    match status {
        401 => return Err(DecantError::InvalidApiKey("github".into())),
        404 => return Err(DecantError::ContentNotFound(url.to_string())),
        403 | 429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(crate::retry::parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            if status == 429 || body.to_lowercase().contains("rate limit") {
                return Err(DecantError::RateLimitExceeded { retry_after });
            }
            return Err(DecantError::Forbidden(format!("GitHub API: {}", body)));
        }
        s if s >= 400 => {
            let body = response.text().await.unwrap_or_default();
            return Err(DecantError::FetchFailed {
                message: format!("GitHub API {}: {}", s, body),
                status: Some(s),
                retry_after: None,
            });
        }
        _ => {}
    }

    response
        .json()
        .await
        .map_err(|e| DecantError::Parsing(format!("GitHub response: {}", e)))
}

async fn fetch_readme(
    http: &reqwest::Client,
    owner: &str,
    repo: &str,
    opts: &ExtractOptions,
) -> Option<String> {
    let mut request = http
        .get(format!("{}/repos/{}/{}/readme", API_BASE, owner, repo))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.raw+json");
    if let Some(token) = opts.github_token.as_deref() {
        request = request.bearer_auth(token);
    }
    if let Some(timeout) = opts.timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok().filter(|t| !t.is_empty())
}

/// `(owner, repo)` from a repository URL path.
fn owner_repo(url: &str) -> Option<(String, String)> {
    let host = domain_of(url).to_ascii_lowercase();
    if host != "github.com" && host != "www.github.com" {
        return None;
    }

    let path = url.split("//").nth(1)?.splitn(2, '/').nth(1)?;
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?.split(['?', '#']).next()?.to_string();
    let repo = parts
        .next()?
        .split(['?', '#'])
        .next()?
        .trim_end_matches(".git")
        .to_string();

    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    license: Option<License>,
    homepage: Option<String>,
    default_branch: String,
    updated_at: String,
    owner: Option<Owner>,
}

#[derive(Deserialize)]
struct License {
    spdx_id: Option<String>,
}

#[derive(Deserialize)]
struct Owner {
    avatar_url: String,
}
