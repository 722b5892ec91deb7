use std::sync::Arc;

use serde_json::json;

use decant_common::config::LlmConfig;
use decant_common::types::{Classification, Extraction};

use crate::llm::{ChatMessage, ChatOptions, LlmCaller};

/// LLM-backed classifier. Without a client — or on any LLM failure — it
/// degrades to the Uncategorized/Inbox/other fallback at confidence 0.3,
/// so the import pipeline never stalls on classification.
pub struct Classifier {
    llm: Option<Arc<dyn LlmCaller>>,
    config: LlmConfig,
}

impl Classifier {
    pub fn new(llm: Option<Arc<dyn LlmCaller>>, config: LlmConfig) -> Self {
        Self { llm, config }
    }

    pub async fn classify(
        &self,
        title: &str,
        url: &str,
        extraction: &Extraction,
    ) -> Classification {
        let Some(llm) = &self.llm else {
            metrics::counter!("classify.fallbacks", "reason" => "no_llm").increment(1);
            return Classification::fallback();
        };

        let content: String = extraction
            .body_text()
            .unwrap_or_default()
            .chars()
            .take(self.config.classify_content_chars)
            .collect();

        let schema = json!({
            "type": "object",
            "required": ["segment", "category", "contentType", "confidence"],
            "properties": {
                "segment": {
                    "type": "string",
                    "enum": ["A", "D", "E", "L", "P", "S", "U"]
                },
                "category": {"type": "string", "minLength": 1, "maxLength": 16},
                "contentType": {"type": "string", "minLength": 1, "maxLength": 1},
                "organization": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "keyConcepts": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
                "summary": {"type": "string"}
            }
        });

        let messages = [
            ChatMessage::system(
                "You classify bookmarked web content into a personal knowledge base. \
                 Reply with JSON only.\n\
                 segment: one character — A (AI/ML), D (dev tools), E (entertainment), \
                 L (learning), P (productivity), S (science), U (uncategorized).\n\
                 category: a short uppercase mnemonic such as LLM, WEB, DB, GAME.\n\
                 contentType: one character — T (tool), V (video), R (repository), \
                 P (post), D (document), O (other).\n\
                 organization: the company or creator behind the content, if clear.\n\
                 confidence: 0..1. keyConcepts: up to five. summary: 1-2 sentences.",
            ),
            ChatMessage::user(format!(
                "Title: {}\nURL: {}\nKind: {}\n\nContent:\n{}",
                title, url, extraction.content_kind, content
            )),
        ];

        match llm
            .complete_with_schema(&messages, &schema, ChatOptions::default())
            .await
        {
            Ok(structured) => match serde_json::from_value::<Classification>(structured.value) {
                Ok(classification) => {
                    metrics::counter!("classify.successes").increment(1);
                    classification.sanitized()
                }
                Err(e) => {
                    tracing::warn!(error = %e, url, "Classification payload did not deserialize");
                    metrics::counter!("classify.fallbacks", "reason" => "deserialize").increment(1);
                    Classification::fallback()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, url, "Classification failed — using fallback");
                metrics::counter!("classify.fallbacks", "reason" => "llm_error").increment(1);
                Classification::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decant_common::types::ContentKind;

    #[tokio::test]
    async fn test_no_llm_falls_back() {
        let classifier = Classifier::new(None, LlmConfig::default());
        let extraction = Extraction::fallback(ContentKind::Article, "https://x.io", None);
        let c = classifier.classify("Title", "https://x.io", &extraction).await;
        assert_eq!(c.segment, "U");
        assert_eq!(c.category, "INBOX");
        assert!((c.confidence - 0.3).abs() < f64::EPSILON);
    }
}
