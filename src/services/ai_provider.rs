//! Chat-completion client used to write and verify quiz questions.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AiConfig;

/// Failures surfaced by a chat provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build AI provider client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[error("AI provider request failed")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("AI provider answered with status {status}")]
    Status { status: StatusCode },
    #[error("failed to decode AI provider response")]
    Decode {
        #[source]
        source: reqwest::Error,
    },
    /// The provider answered without any message content.
    #[error("AI provider returned an empty completion")]
    EmptyCompletion,
    #[error("AI provider request timed out")]
    Timeout,
}

/// A single-turn prompt for a given model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
}

/// Anything that turns a prompt into a completion.
pub trait ChatProvider: Send + Sync {
    fn complete(&self, request: ChatRequest) -> BoxFuture<'static, Result<String, ProviderError>>;
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct HttpChatProvider {
    client: Client,
    endpoint: Arc<str>,
    api_key: Option<Arc<str>>,
}

impl HttpChatProvider {
    /// Build a client for `config.base_url`; requests carry `api_key` as a bearer token.
    pub fn new(config: &AiConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| ProviderError::ClientBuilder { source })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')).into(),
            api_key: api_key.map(Into::into),
        })
    }

    async fn send(&self, request: ChatRequest) -> Result<String, ProviderError> {
        let body = CompletionRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let mut builder = self.client.post(self.endpoint.as_ref()).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|source| {
            if source.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Transport { source }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status { status });
        }

        let completion = response.json::<CompletionResponse>().await.map_err(|source| {
            if source.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Decode { source }
            }
        })?;

        debug!(model = %request.model, "AI completion received");
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ProviderError::EmptyCompletion)
    }
}

impl ChatProvider for HttpChatProvider {
    fn complete(&self, request: ChatRequest) -> BoxFuture<'static, Result<String, ProviderError>> {
        let provider = self.clone();
        Box::pin(async move { provider.send(request).await })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}
