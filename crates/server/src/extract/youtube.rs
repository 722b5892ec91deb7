use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use serde_json::{json, Value};

use decant_common::types::{
    domain_of, ContentKind, ExtractOptions, Extraction, ExtractionMetadata, ExtractionMethod,
};
use decant_common::DecantError;

use super::Extractor;

const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

pub struct YoutubeExtractor;

impl Extractor for YoutubeExtractor {
    fn content_kind(&self) -> ContentKind {
        ContentKind::Youtube
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    fn can_handle(&self, url: &str) -> bool {
        video_id(url).is_some()
    }

    fn extract<'a>(
        &'a self,
        http: &'a reqwest::Client,
        url: &'a str,
        opts: &'a ExtractOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, DecantError>> + Send + 'a>> {
        Box::pin(async move {
            let id = video_id(url)
                .ok_or_else(|| DecantError::UrlInvalid(format!("No video id in {}", url)))?;

            let Some(api_key) = opts.youtube_api_key.as_deref() else {
                // No key: minimal metadata so classification can still run.
                let mut extraction =
                    Extraction::fallback(ContentKind::Youtube, url, None);
                extraction.data.insert("videoId".into(), json!(id));
                return Ok(extraction);
            };

            fetch_video(http, url, &id, api_key, opts).await
        })
    }
}

async fn fetch_video(
    http: &reqwest::Client,
    url: &str,
    id: &str,
    api_key: &str,
    opts: &ExtractOptions,
) -> Result<Extraction, DecantError> {
    let mut request = http.get(VIDEOS_URL).query(&[
        ("part", "snippet,statistics,contentDetails"),
        ("id", id),
        ("key", api_key),
    ]);
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
        401 => return Err(DecantError::InvalidApiKey("youtube".into())),
        404 => return Err(DecantError::ContentNotFound(url.to_string())),
        403 => {
            let body = response.text().await.unwrap_or_default();
            if body.contains("quotaExceeded") || body.contains("rateLimitExceeded") {
                return Err(DecantError::RateLimitExceeded { retry_after: None });
            }
            return Err(DecantError::InvalidApiKey("youtube".into()));
        }
        s if s >= 400 => {
            let body = response.text().await.unwrap_or_default();
            return Err(DecantError::FetchFailed {
                message: format!("YouTube API {}: {}", s, body),
                status: Some(s),
                retry_after: None,
            });
        }
        _ => {}
    }

    let body: VideosResponse = response
        .json()
        .await
        .map_err(|e| DecantError::Parsing(format!("YouTube response: {}", e)))?;

    let Some(item) = body.items.into_iter().next() else {
        return Err(DecantError::ContentNotFound(url.to_string()));
    };

    let mut data = serde_json::Map::new();
    data.insert("videoId".into(), json!(id));
    data.insert("url".into(), json!(url));
    data.insert("title".into(), json!(item.snippet.title));
    data.insert("channelTitle".into(), json!(item.snippet.channel_title));
    data.insert("description".into(), json!(item.snippet.description));
    data.insert("publishedAt".into(), json!(item.snippet.published_at));
    if let Some(tags) = item.snippet.tags {
        data.insert("tags".into(), json!(tags));
    }
    if let Some(thumb) = item
        .snippet
        .thumbnails
        .and_then(|t| t.high.or(t.default))
        .map(|t| t.url)
    {
        data.insert("thumbnailUrl".into(), json!(thumb));
    }
    if let Some(stats) = item.statistics {
        data.insert("viewCount".into(), json!(stats.view_count));
        data.insert("likeCount".into(), json!(stats.like_count));
    }
    if let Some(details) = item.content_details {
        data.insert("duration".into(), json!(details.duration));
    }
    data.insert("sourceDomain".into(), Value::String(domain_of(url)));

    let mut metadata = ExtractionMetadata::new(ExtractionMethod::ApiStandard, 1.0);
    metadata.api_used = Some("youtube_data_api_v3".into());

    Ok(Extraction {
        content_kind: ContentKind::Youtube,
        data,
        metadata,
    })
}

/// Pull the video id out of the common YouTube URL shapes.
fn video_id(url: &str) -> Option<String> {
    let host = domain_of(url).to_ascii_lowercase();

    let path_and_query = url.split("//").nth(1)?.splitn(2, '/').nth(1).unwrap_or("");

    if host.contains("youtu.be") {
        let id = path_and_query.split(['?', '&']).next()?;
        return normalize_id(id);
    }

    if host.contains("youtube.com") {
        if let Some(query) = url.split('?').nth(1) {
            for pair in query.split('&') {
                if let Some(v) = pair.strip_prefix("v=") {
                    return normalize_id(v);
                }
            }
        }
        for prefix in ["shorts/", "embed/", "live/"] {
            if let Some(rest) = path_and_query.strip_prefix(prefix) {
                return normalize_id(rest.split(['?', '&', '/']).next()?);
            }
        }
    }

    None
}

fn normalize_id(raw: &str) -> Option<String> {
    let id: String = raw
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if id.len() >= 8 {
        Some(id)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Deserialize)]
struct VideoItem {
    snippet: Snippet,
    statistics: Option<Statistics>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
}

#[derive(Deserialize)]
struct Snippet {
    title: String,
    #[serde(rename = "channelTitle")]
    channel_title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "publishedAt")]
    published_at: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
struct Statistics {
    #[serde(rename = "viewCount", default)]
    view_count: Option<String>,
    #[serde(rename = "likeCount", default)]
    like_count: Option<String>,
}

#[derive(Deserialize)]
struct ContentDetails {
    duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_watch_url() {
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".into())
        );
    }

    #[test]
    fn test_video_id_short_url() {
        assert_eq!(
            video_id("https://youtu.be/dQw4w9WgXcQ?t=42"),
            Some("dQw4w9WgXcQ".into())
        );
    }

    #[test]
    fn test_video_id_shorts() {
        assert_eq!(
            video_id("https://www.youtube.com/shorts/abcdefgh123"),
            Some("abcdefgh123".into())
        );
    }

    #[test]
    fn test_video_id_rejects_non_video() {
        assert_eq!(video_id("https://www.youtube.com/feed/library"), None);
        assert_eq!(video_id("https://example.com/watch?v=abc"), None);
    }

    #[tokio::test]
    async fn test_keyless_extraction_is_fallback() {
        let extractor = YoutubeExtractor;
        let extraction = extractor
            .extract(
                &reqwest::Client::new(),
                "https://youtu.be/dQw4w9WgXcQ",
                &ExtractOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            extraction.metadata.extraction_method,
            ExtractionMethod::Fallback
        );
        assert!(extraction.metadata.confidence <= 0.3);
        assert_eq!(extraction.data["videoId"], "dQw4w9WgXcQ");
    }
}
