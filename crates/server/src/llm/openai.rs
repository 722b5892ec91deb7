use serde::{Deserialize, Serialize};

use decant_common::DecantError;

use crate::retry::parse_retry_after;

use super::{ChatMessage, Completion, TokenUsage};

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
/// Single chat-completion attempt against an OpenAI-compatible endpoint.
pub(super) async fn send_chat_completion(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
    temperature: f64,
    max_tokens: u32,
    json_mode: bool,
) -> Result<Completion, DecantError> {
    let start = std::time::Instant::now();
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let wire_messages: Vec<WireMessage> = messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect();

    let request = ChatRequest {
        model,
        max_tokens,
        temperature,
        messages: wire_messages,
        response_format: json_mode.then_some(ResponseFormat {
            r#type: "json_object",
        }),
    };

    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&request)
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

    let status = response.status();
    metrics::histogram!("llm.api.latency", "model" => model.to_string())
        .record(start.elapsed().as_secs_f64());

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        metrics::counter!("llm.api.errors", "kind" => "auth").increment(1);
        return Err(DecantError::Unauthorized(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        metrics::counter!("llm.api.errors", "kind" => "rate_limit").increment(1);
        return Err(DecantError::RateLimitExceeded { retry_after });
    }

    if !status.is_success() {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        metrics::counter!("llm.api.errors", "kind" => "api").increment(1);
        return Err(DecantError::FetchFailed {
            message: format!("{}: {}", status, message),
            status: Some(status.as_u16()),
            retry_after,
        });
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| DecantError::LlmParse(format!("Malformed chat response: {}", e)))?;

    let usage = body
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    metrics::counter!("llm.api.input_tokens").increment(usage.input_tokens);
    metrics::counter!("llm.api.output_tokens").increment(usage.output_tokens);

    Ok(Completion {
        content,
        model: body.model.unwrap_or_else(|| model.to_string()),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"content": "Hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(resp.usage.as_ref().unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_parse_missing_usage() {
        let json = r#"{"choices": [{"message": {"content": null}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.usage.is_none());
        assert!(resp.choices[0].message.content.is_none());
    }

    #[test]
    fn test_request_serialization_with_json_mode() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            max_tokens: 100,
            temperature: 0.3,
            messages: vec![WireMessage {
                role: "user",
                content: "hi",
            }],
            response_format: Some(ResponseFormat {
                r#type: "json_object",
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
