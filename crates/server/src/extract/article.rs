use std::future::Future;
use std::pin::Pin;

use scraper::{Html, Selector};
use serde_json::json;

use decant_common::types::{
    domain_of, ContentKind, ExtractOptions, Extraction, ExtractionMetadata, ExtractionMethod,
};
use decant_common::DecantError;

use super::Extractor;

/// Bodies beyond this are rejected rather than parsed.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Extracted article text is truncated to this many characters.
const CONTENT_MAX_CHARS: usize = 50_000;

/// Generic HTML extractor — the universal fallback for URLs no
/// site-specific extractor claims.
pub struct ArticleExtractor;

impl Extractor for ArticleExtractor {
    fn content_kind(&self) -> ContentKind {
        ContentKind::Article
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    fn extract<'a>(
        &'a self,
        http: &'a reqwest::Client,
        url: &'a str,
        opts: &'a ExtractOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, DecantError>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = http.get(url);
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
                404 | 410 => return Err(DecantError::ContentNotFound(url.to_string())),
                429 => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(crate::retry::parse_retry_after);
                    return Err(DecantError::RateLimitExceeded { retry_after });
                }
                s if s >= 400 => {
                    return Err(DecantError::FetchFailed {
                        message: format!("{} returned HTTP {}", url, s),
                        status: Some(s),
                        retry_after: None,
                    });
                }
                _ => {}
            }

            if let Some(length) = response.content_length() {
                if length as usize > MAX_BODY_BYTES {
                    return Err(DecantError::ContentTooLarge(format!(
                        "{} bytes at {}",
                        length, url
                    )));
                }
            }

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_lowercase)
                .unwrap_or_default();

            let is_text = content_type.is_empty()
                || content_type.contains("text/")
                || content_type.contains("application/json")
                || content_type.contains("application/xml")
                || content_type.contains("application/xhtml");
            if !is_text {
                return Err(DecantError::UnsupportedContentType(content_type));
            }

            let body = response.text().await.map_err(|e| DecantError::FetchFailed {
                message: e.to_string(),
                status: None,
                retry_after: None,
            })?;

            if body.len() > MAX_BODY_BYTES {
                return Err(DecantError::ContentTooLarge(format!(
                    "{} bytes at {}",
                    body.len(),
                    url
                )));
            }

            let mut data = serde_json::Map::new();
            data.insert("url".into(), json!(url));
            data.insert("sourceDomain".into(), json!(domain_of(url)));

            if content_type.contains("text/html") || looks_like_html(&body) {
                let page = parse_page(&body);
                if let Some(title) = page.title {
                    data.insert("title".into(), json!(title));
                }
                if let Some(description) = page.description {
                    data.insert("description".into(), json!(description));
                }
                if let Some(image) = page.image {
                    data.insert("logoUrl".into(), json!(image));
                }
                if let Some(site_name) = page.site_name {
                    data.insert("siteName".into(), json!(site_name));
                }
                let content: String = page.text.chars().take(CONTENT_MAX_CHARS).collect();
                data.insert("content".into(), json!(content));
            } else {
                let content: String = body.chars().take(CONTENT_MAX_CHARS).collect();
                data.insert("content".into(), json!(content));
            }

            Ok(Extraction {
                content_kind: ContentKind::Article,
                data,
                metadata: ExtractionMetadata::new(ExtractionMethod::Scraping, 0.7),
            })
        })
    }
}

struct ParsedPage {
    title: Option<String>,
    description: Option<String>,
    image: Option<String>,
    site_name: Option<String>,
    text: String,
}

fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start().get(..256).unwrap_or(body.trim_start());
    let lower = head.to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html") || lower.contains("<head")
}

fn parse_page(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    let title = meta_content(&document, "meta[property=\"og:title\"]")
        .or_else(|| element_text(&document, "title"));
    let description = meta_content(&document, "meta[property=\"og:description\"]")
        .or_else(|| meta_content(&document, "meta[name=\"description\"]"));
    let image = meta_content(&document, "meta[property=\"og:image\"]");
    let site_name = meta_content(&document, "meta[property=\"og:site_name\"]");

    ParsedPage {
        title,
        description,
        image,
        site_name,
        text: extract_html_content(html),
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|e| e.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn element_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract readable text from HTML, dropping script, style, nav, footer,
/// header and similar chrome elements.
pub fn extract_html_content(html: &str) -> String {
    let document = Html::parse_document(html);

    let remove_selectors = [
        "script", "style", "nav", "footer", "header", "noscript", "svg", "aside",
    ];

    let mut skip_ids = std::collections::HashSet::new();

    for sel_str in &remove_selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            for element in document.select(&selector) {
                skip_ids.insert(element.id());
            }
        }
    }

    // Walk the tree collecting text from nodes outside the skip set.
    let mut text_parts = Vec::new();

    for node in document.tree.nodes() {
        let mut should_skip = false;
        let mut check_id = Some(node.id());
        while let Some(id) = check_id {
            if skip_ids.contains(&id) {
                should_skip = true;
                break;
            }
            check_id = document
                .tree
                .get(id)
                .and_then(|n| n.parent())
                .map(|p| p.id());
        }

        if should_skip {
            continue;
        }

        if let Some(text) = node.value().as_text() {
            let trimmed = text.text.trim();
            if !trimmed.is_empty() {
                text_parts.push(trimmed.to_string());
            }
        }
    }

    collapse_whitespace(&text_parts.join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(c);
            prev_was_space = false;
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <!DOCTYPE html>
        <html>
        <head>
            <title>Fallback Title</title>
            <meta property="og:title" content="Preferred Title">
            <meta name="description" content="A page about things.">
            <meta property="og:image" content="https://example.com/logo.png">
        </head>
        <body>
            <nav>Navigation here</nav>
            <main>
                <h1>Article Heading</h1>
                <p>This is the main content of the article.</p>
            </main>
            <footer>Footer content</footer>
            <script>alert('bad');</script>
        </body>
        </html>
    "#;

    #[test]
    fn test_extract_html_content_drops_chrome() {
        let text = extract_html_content(PAGE);
        assert!(text.contains("Article Heading"));
        assert!(text.contains("main content"));
        assert!(!text.contains("Navigation here"));
        assert!(!text.contains("Footer content"));
        assert!(!text.contains("alert"));
    }

    #[test]
    fn test_parse_page_prefers_og_title() {
        let page = parse_page(PAGE);
        assert_eq!(page.title.as_deref(), Some("Preferred Title"));
        assert_eq!(page.description.as_deref(), Some("A page about things."));
        assert_eq!(page.image.as_deref(), Some("https://example.com/logo.png"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("hello   world"), "hello world");
        assert_eq!(collapse_whitespace("  a\n\n  b  "), "a b");
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("{\"json\": true}"));
    }

    #[test]
    fn test_can_handle_requires_http() {
        let e = ArticleExtractor;
        assert!(e.can_handle("https://example.com"));
        assert!(!e.can_handle("ftp://example.com"));
    }
}
