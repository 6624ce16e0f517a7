//! HTTP client for OpenAI-compatible chat-completion servers.

use crate::error::{LlmError, LlmResult};
use crate::generator::Generator;
use crate::types::*;
use async_trait::async_trait;
use kiln_config::LlmConfig;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Client for a chat-completions endpoint.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    host: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    /// Create a new client from configuration.
    pub fn from_config(config: &LlmConfig) -> LlmResult<Self> {
        if config.model.trim().is_empty() {
            return Err(LlmError::InvalidConfig("llm.model is empty".to_string()));
        }

        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the server answers.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/v1/models", self.host);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Run one non-streaming chat completion.
    pub async fn complete(&self, request: &GenerationRequest) -> LlmResult<GenerationResponse> {
        let url = format!("{}/v1/chat/completions", self.host);
        debug!(
            "Chat completion with model {} ({} messages, schema {:?})",
            self.model,
            request.messages.len(),
            request.schema_name()
        );

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            response_format: request.response_schema.as_ref().map(ResponseFormat::from),
        };

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 && text.contains("model") {
                return Err(LlmError::ModelNotFound {
                    model: self.model.clone(),
                });
            }

            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        info!("Generated {} characters", content.chars().count());

        Ok(GenerationResponse {
            content,
            model: completion.model,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_connect() {
            LlmError::ServerNotRunning {
                host: self.host.clone(),
            }
        } else if e.is_timeout() {
            LlmError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            LlmError::Http(e)
        }
    }
}

#[async_trait]
impl Generator for ChatClient {
    async fn invoke(&self, request: GenerationRequest) -> LlmResult<GenerationResponse> {
        self.complete(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = LlmConfig::default();
        let client = ChatClient::from_config(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_rejects_empty_model() {
        let config = LlmConfig {
            model: "  ".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            ChatClient::from_config(&config),
            Err(LlmError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error() {
        let config = LlmConfig {
            host: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            ..LlmConfig::default()
        };
        let client = ChatClient::from_config(&config).unwrap();

        assert!(!client.is_available().await);
        let result = client
            .invoke(GenerationRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(result.is_err());
    }
}
