use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use decant_common::types::{
    domain_of, ContentKind, ExtractOptions, Extraction, ExtractionMetadata, ExtractionMethod,
};
use decant_common::DecantError;

use super::Extractor;

const API_BASE: &str = "https://api.twitter.com/2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TwitterExtractor;

impl Extractor for TwitterExtractor {
    fn content_kind(&self) -> ContentKind {
        ContentKind::Twitter
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    fn can_handle(&self, url: &str) -> bool {
        tweet_id(url).is_some()
    }

    fn extract<'a>(
        &'a self,
        http: &'a reqwest::Client,
        url: &'a str,
        opts: &'a ExtractOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, DecantError>> + Send + 'a>> {
        Box::pin(async move {
            let id = tweet_id(url)
                .ok_or_else(|| DecantError::UrlInvalid(format!("No tweet id in {}", url)))?;

            let Some(bearer) = opts.twitter_bearer_token.as_deref() else {
                let mut extraction = Extraction::fallback(ContentKind::Twitter, url, None);
                extraction.data.insert("tweetId".into(), json!(id));
                return Ok(extraction);
            };

            fetch_tweet(http, url, &id, bearer, opts).await
        })
    }
}

async fn fetch_tweet(
    http: &reqwest::Client,
    url: &str,
    id: &str,
    bearer: &str,
    opts: &ExtractOptions,
) -> Result<Extraction, DecantError> {
    let timeout = opts.timeout.unwrap_or(DEFAULT_TIMEOUT);

    let response = http
        .get(format!("{}/tweets/{}", API_BASE, id))
        .query(&[
            ("tweet.fields", "created_at,public_metrics,lang"),
            ("expansions", "author_id"),
            ("user.fields", "name,username,profile_image_url"),
        ])
        .bearer_auth(bearer)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
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
        401 => return Err(DecantError::InvalidApiKey("twitter".into())),
        404 => return Err(DecantError::ContentNotFound(url.to_string())),
        403 | 429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(crate::retry::parse_retry_after);
            return Err(DecantError::RateLimitExceeded { retry_after });
        }
        s if s >= 400 => {
            let body = response.text().await.unwrap_or_default();
            return Err(DecantError::FetchFailed {
                message: format!("Twitter API {}: {}", s, body),
                status: Some(s),
                retry_after: None,
            });
        }
        _ => {}
    }

    let body: TweetResponse = response
        .json()
        .await
        .map_err(|e| DecantError::Parsing(format!("Twitter response: {}", e)))?;

    let Some(tweet) = body.data else {
        return Err(DecantError::ContentNotFound(url.to_string()));
    };

    let mut data = serde_json::Map::new();
    data.insert("tweetId".into(), json!(id));
    data.insert("url".into(), json!(url));
    data.insert("text".into(), json!(tweet.text));
    if let Some(created_at) = tweet.created_at {
        data.insert("createdAt".into(), json!(created_at));
    }
    if let Some(lang) = tweet.lang {
        data.insert("lang".into(), json!(lang));
    }
    if let Some(metrics) = tweet.public_metrics {
        data.insert("likeCount".into(), json!(metrics.like_count));
        data.insert("retweetCount".into(), json!(metrics.retweet_count));
        data.insert("replyCount".into(), json!(metrics.reply_count));
    }
    if let Some(author) = body.includes.and_then(|i| i.users.into_iter().next()) {
        data.insert("authorName".into(), json!(author.name));
        data.insert("authorUsername".into(), json!(author.username));
        data.insert(
            "title".into(),
            json!(format!("@{} on X", author.username)),
        );
        if let Some(avatar) = author.profile_image_url {
            data.insert("logoUrl".into(), json!(avatar));
        }
    }
    data.insert("sourceDomain".into(), json!(domain_of(url)));

    let mut metadata = ExtractionMetadata::new(ExtractionMethod::ApiStandard, 1.0);
    metadata.api_used = Some("twitter_api_v2".into());

    Ok(Extraction {
        content_kind: ContentKind::Twitter,
        data,
        metadata,
    })
}

/// Numeric status id from `/status/<id>` URL shapes on twitter.com / x.com.
fn tweet_id(url: &str) -> Option<String> {
    let host = domain_of(url).to_ascii_lowercase();
    let is_twitter = host.contains("twitter.com") || host == "x.com" || host == "www.x.com";
    if !is_twitter {
        return None;
    }

    let path = url.split("//").nth(1)?.splitn(2, '/').nth(1)?;
    let mut parts = path.split('/');
    while let Some(part) = parts.next() {
        if part == "status" || part == "statuses" {
            let id: String = parts
                .next()?
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            return if id.is_empty() { None } else { Some(id) };
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TweetResponse {
    data: Option<Tweet>,
    includes: Option<Includes>,
}

#[derive(Deserialize)]
struct Tweet {
    text: String,
    created_at: Option<String>,
    lang: Option<String>,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
}

#[derive(Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Deserialize)]
struct User {
    name: String,
    username: String,
    profile_image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tweet_id() {
        assert_eq!(
            tweet_id("https://twitter.com/user/status/1234567890"),
            Some("1234567890".into())
        );
        assert_eq!(
            tweet_id("https://x.com/someone/status/42?s=20"),
            Some("42".into())
        );
    }

    #[test]
    fn test_tweet_id_rejects_profiles_and_other_hosts() {
        assert_eq!(tweet_id("https://twitter.com/user"), None);
        assert_eq!(tweet_id("https://example.com/status/1"), None);
    }

    #[tokio::test]
    async fn test_keyless_extraction_is_fallback() {
        let extractor = TwitterExtractor;
        let extraction = extractor
            .extract(
                &reqwest::Client::new(),
                "https://x.com/user/status/1234567890",
                &ExtractOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            extraction.metadata.extraction_method,
            ExtractionMethod::Fallback
        );
        assert_eq!(extraction.data["tweetId"], "1234567890");
    }
}
