//! Prompt execution capability and its OpenAI-compatible implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use porter_shared::{LlmConfig, PorterError, Result, api_key};

/// Submit prompt text, receive response text.
#[async_trait]
pub trait PromptExecutor: Send + Sync {
    /// Any transport or provider failure is [`PorterError::LlmUnavailable`].
    async fn invoke(&self, text: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    n: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// ChatCompletionsExecutor
// ---------------------------------------------------------------------------

/// Executes prompts against an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionsExecutor {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsExecutor {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PorterError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Build from config, reading the key from the configured env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(config, api_key(config)?)
    }

    /// Same endpoint and credentials, different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl PromptExecutor for ChatCompletionsExecutor {
    #[instrument(skip_all, fields(model = %self.model, len = text.len()))]
    async fn invoke(&self, text: &str) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: text,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            n: 1,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "prompt request failed");
                PorterError::LlmUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, error = %body, "prompt endpoint returned an error");
            return Err(PorterError::LlmUnavailable(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PorterError::LlmUnavailable(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let reply = clean_reply(&content);
        if reply.is_empty() {
            return Err(PorterError::LlmUnavailable("empty response".into()));
        }

        debug!(duration_ms = start.elapsed().as_millis(), len = reply.len(), "prompt answered");
        Ok(reply)
    }
}

/// Trim, then drop one pair of wrapping double quotes and one of single quotes.
pub fn clean_reply(raw: &str) -> String {
    let mut text = raw.trim();
    for quote in ['"', '\''] {
        if text.len() > 1 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    #[test]
    fn clean_reply_strips_wrapping_quotes_once() {
        assert_eq!(clean_reply("  \"Lima\" \n"), "Lima");
        assert_eq!(clean_reply("'Lima'"), "Lima");
        assert_eq!(clean_reply("\"'Lima'\""), "Lima");
        assert_eq!(clean_reply("\"a\" and \"b\""), "a\" and \"b");
        assert_eq!(clean_reply("\""), "\"");
        assert_eq!(clean_reply("plain"), "plain");
    }

    #[tokio::test]
    async fn posts_chat_completion_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "messages": [{ "role": "user", "content": "Say hi" }],
                "max_tokens": 1000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(" \"hi\" ")))
            .expect(1)
            .mount(&server)
            .await;

        let executor =
            ChatCompletionsExecutor::new(&config(&format!("{}/v1", server.uri())), "sk-test").unwrap();
        assert_eq!(executor.invoke("Say hi").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn with_model_overrides_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "model": "validator-mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("1")))
            .expect(1)
            .mount(&server)
            .await;

        let executor = ChatCompletionsExecutor::new(&config(&server.uri()), "k")
            .unwrap()
            .with_model("validator-mini");
        assert_eq!(executor.model(), "validator-mini");
        assert_eq!(executor.invoke("check").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn http_error_is_llm_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let executor = ChatCompletionsExecutor::new(&config(&server.uri()), "k").unwrap();
        let err = executor.invoke("x").await.unwrap_err();
        assert!(matches!(err, PorterError::LlmUnavailable(ref m) if m.contains("rate limited")));
    }

    #[tokio::test]
    async fn empty_content_is_llm_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  \"\"  ")))
            .mount(&server)
            .await;

        let executor = ChatCompletionsExecutor::new(&config(&server.uri()), "k").unwrap();
        assert!(matches!(
            executor.invoke("x").await.unwrap_err(),
            PorterError::LlmUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_llm_unavailable() {
        let executor = ChatCompletionsExecutor::new(&config("http://127.0.0.1:9"), "k").unwrap();
        assert!(matches!(
            executor.invoke("x").await.unwrap_err(),
            PorterError::LlmUnavailable(_)
        ));
    }
}
