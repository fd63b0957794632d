//! OpenAI-compatible `/chat/completions` client
//!
//! Groq, Together, OpenRouter, the Hugging Face router and Ollama (`/v1`) all
//! speak this protocol, so one client covers every built-in backend.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::{
    framed_system_prompt, CompletionRequest, CompletionResponse, ProviderClient, ProviderError,
};
use crate::config::Endpoint;
use crate::state::types::ProviderId;

static CONFIDENCE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*confidence\s*:\s*([01](?:\.\d+)?)\s*\]")
        .expect("CONFIDENCE_TAG_RE regex should compile")
});

/// Upper bound on any single HTTP exchange; per-mode timeouts are shorter
/// and applied by the coordinator.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::Network(e.to_string()))
}

/// Split a trailing `[confidence: X]` tag off a response
pub fn extract_confidence(content: &str) -> (String, Option<f32>) {
    let Some(caps) = CONFIDENCE_TAG_RE.captures_iter(content).last() else {
        return (content.trim().to_string(), None);
    };
    let confidence = caps
        .get(1)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|c| c.clamp(0.0, 1.0));
    let stripped = match caps.get(0) {
        Some(tag) => format!("{}{}", &content[..tag.start()], &content[tag.end()..]),
        None => content.to_string(),
    };
    (stripped.trim().to_string(), confidence)
}

pub struct OpenAiCompatibleClient {
    name: ProviderId,
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(name: impl Into<ProviderId>, endpoint: Endpoint, http: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            endpoint,
            http,
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'))
    }

    fn parse(&self, resp_json: &serde_json::Value) -> Result<CompletionResponse, ProviderError> {
        let raw = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".into()))?;
        let (content, confidence) = extract_confidence(raw);
        if content.is_empty() {
            return Err(ProviderError::Malformed("empty completion".into()));
        }
        let usage = &resp_json["usage"];
        Ok(CompletionResponse {
            content,
            input_tokens: usage["prompt_tokens"].as_u64().map(|n| n as u32),
            output_tokens: usage["completion_tokens"].as_u64().map(|n| n as u32),
            confidence,
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": framed_system_prompt(request) },
                { "role": "user", "content": request.prompt },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut builder = self.http.post(self.url()).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(HTTP_TIMEOUT)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let parsed = self.parse(&resp_json)?;
        debug!(
            provider = %self.name,
            output_tokens = ?parsed.output_tokens,
            confidence = ?parsed.confidence,
            "Completion received"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(
            "groq-llama3-70b",
            Endpoint {
                base_url: "https://api.groq.com/openai/v1/".into(),
                api_key: Some("k".into()),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_extract_confidence() {
        let (text, conf) = extract_confidence("Paris is the capital.\n[confidence: 0.92]");
        assert_eq!(text, "Paris is the capital.");
        assert_eq!(conf, Some(0.92));

        let (text, conf) = extract_confidence("No tag here");
        assert_eq!(text, "No tag here");
        assert_eq!(conf, None);

        let (_, conf) = extract_confidence("[Confidence : 1]");
        assert_eq!(conf, Some(1.0));
    }

    #[test]
    fn test_url_joins_cleanly() {
        assert_eq!(
            client().url(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_response_with_usage() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "Hello [confidence: 0.7]" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        });
        let parsed = client().parse(&json).unwrap();
        assert_eq!(parsed.content, "Hello");
        assert_eq!(parsed.confidence, Some(0.7));
        assert_eq!(parsed.input_tokens, Some(12));
        assert_eq!(parsed.output_tokens, Some(3));
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        let json = serde_json::json!({ "choices": [] });
        assert!(matches!(
            client().parse(&json),
            Err(ProviderError::Malformed(_))
        ));
        let empty = serde_json::json!({ "choices": [{ "message": { "content": "[confidence: 0.9]" } }] });
        assert!(client().parse(&empty).is_err());
    }
}
