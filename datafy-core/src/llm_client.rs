//! Text-generation client for the model collaborator

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3:4b";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("generation failed: {0}")]
    Other(String),
}

/// The one capability the pipeline consumes: prompt in, text out
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError>;
}

/// Wire protocol spoken by the generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Configuration for the generation client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base URL; the protocol path is appended
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub top_p: f32,
    /// Upper bound on retrying transient statuses (429, 502, 503, 504)
    pub retry_max_elapsed: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            endpoint: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            top_p: 0.95,
            retry_max_elapsed: Duration::from_secs(30),
        }
    }
}

/// HTTP client for Ollama or OpenAI-compatible services
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: Option<String>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn url(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        match self.config.provider {
            LlmProvider::Ollama => format!("{}/api/generate", base),
            LlmProvider::OpenAi => format!("{}/v1/chat/completions", base),
        }
    }

    fn body(&self, prompt: &str, temperature: f32) -> Result<Value, GenerationError> {
        let body = match self.config.provider {
            LlmProvider::Ollama => json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": temperature,
                    "top_p": self.config.top_p,
                }
            }),
            LlmProvider::OpenAi => serde_json::to_value(ChatRequest {
                model: &self.config.model,
                messages: vec![Message {
                    role: "user",
                    content: prompt,
                }],
                temperature,
                top_p: self.config.top_p,
            })
            .map_err(|e| GenerationError::Other(e.to_string()))?,
        };
        Ok(body)
    }

    /// Make API call
    async fn call(&self, body: &Value) -> Result<String, GenerationError> {
        debug!("Making text generation call to {}", self.url());

        let mut request = self.client.post(self.url()).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let payload: Value = response.json().await.map_err(|e| self.classify(e))?;
        self.parse(payload)
    }

    fn classify(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.config.timeout)
        } else {
            GenerationError::Http(err)
        }
    }

    fn parse(&self, payload: Value) -> Result<String, GenerationError> {
        match self.config.provider {
            LlmProvider::Ollama => serde_json::from_value::<OllamaResponse>(payload)
                .map(|r| r.response.unwrap_or_default())
                .map_err(|e| GenerationError::InvalidResponse(e.to_string())),
            LlmProvider::OpenAi => payload["choices"][0]["message"]["content"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| GenerationError::InvalidResponse("missing choices[0].message.content".into())),
        }
    }
}

fn is_transient(err: &GenerationError) -> bool {
    match err {
        GenerationError::Status { status, .. } => matches!(*status, 429 | 502 | 503 | 504),
        _ => false,
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let body = self.body(prompt, temperature)?;

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.retry_max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            self.call(&body).await.map_err(|e| {
                if is_transient(&e) {
                    warn!("Transient generation failure, retrying: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}

/// Replays canned replies in order; fails once the queue runs dry
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A generator with nothing to say; every call fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Queue a failing call.
    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(message.into()));
        }
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| GenerationError::Other(e.to_string()))?
            .pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(GenerationError::Other(message)),
            None => Err(GenerationError::Other("no scripted reply left".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, LlmProvider::Ollama);
        assert_eq!(config.model, "gemma3:4b");
        assert_eq!(config.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_urls_per_provider() {
        let ollama = LlmClient::new(LlmConfig {
            endpoint: "http://host:11434/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ollama.url(), "http://host:11434/api/generate");

        let openai = LlmClient::new(LlmConfig {
            provider: LlmProvider::OpenAi,
            endpoint: "https://api.example.com".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(openai.url(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_transient_statuses() {
        let status = |status| GenerationError::Status {
            status,
            body: String::new(),
        };
        assert!(is_transient(&status(429)));
        assert!(is_transient(&status(503)));
        assert!(!is_transient(&status(500)));
        assert!(!is_transient(&GenerationError::Timeout(DEFAULT_TIMEOUT)));
    }

    #[tokio::test]
    async fn test_scripted_generator_replays_then_fails() {
        let generator = ScriptedGenerator::new(["first"]);
        generator.push_failure("offline");

        assert_eq!(generator.generate("p1", 0.1).await.unwrap(), "first");
        assert!(matches!(
            generator.generate("p2", 0.1).await,
            Err(GenerationError::Other(m)) if m == "offline"
        ));
        assert!(generator.generate("p3", 0.1).await.is_err());
        assert_eq!(generator.prompts(), vec!["p1", "p2", "p3"]);
    }
}
