//! Generation backend abstraction and implementations.
//!
//! Provides the [`GenerationBackend`] trait and two implementations:
//! - [`OpenAiBackend`]: OpenAI-compatible chat-completions API over HTTP
//! - [`CannedBackend`]: scripted in-process backend for demos and tests
//!
//! Callers receive the raw completion text and are responsible for decoding
//! it as structured data; the backend never interprets the payload.
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: required for [`OpenAiBackend`]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Trait for text-generation backends.
///
/// Implementations must be thread-safe (`Send + Sync`) so a single instance
/// can serve concurrent pipeline runs via `Arc<dyn GenerationBackend>`.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a completion for the given prompt.
    ///
    /// Returns the raw completion text. Callers must treat it as untrusted
    /// and decode it with a strict JSON parser — never execute it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Generation`] on transport failure,
    /// non-success API status, or an unparseable response envelope.
    async fn generate(&self, prompt: &str, max_output_tokens: u32)
        -> Result<String, PipelineError>;
}

// ============================================================================
// OpenAI Backend
// ============================================================================

/// Chat-completions request payload.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Chat-completions response envelope.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI-compatible chat-completions backend.
///
/// Requires the `OPENAI_API_KEY` environment variable.
///
/// ## Example
///
/// ```no_run
/// use clientpulse::OpenAiBackend;
/// use std::time::Duration;
///
/// let backend = OpenAiBackend::new("gpt-3.5-turbo")?
///     .with_temperature(0.7)
///     .with_timeout(Duration::from_secs(15));
/// # Ok::<(), clientpulse::PipelineError>(())
/// ```
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiBackend {
    /// Create a new backend for the given model.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `OPENAI_API_KEY` is not set,
    /// so that misconfiguration surfaces at startup rather than at the
    /// first analysis request.
    pub fn new(model: impl Into<String>) -> Result<Self, PipelineError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::Config("OPENAI_API_KEY not set".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        })
    }

    /// Point the backend at a different API host (e.g. a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set sampling temperature (0.0 - 2.0).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens: max_output_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!(
                "API error {status}: {error_text}"
            )));
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Generation(format!("failed to parse response: {e}")))?;

        let choice = envelope
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Generation("no choices in response".to_string()))?;

        Ok(choice.message.content)
    }
}

// ============================================================================
// Canned Backend (demos, offline mode, tests)
// ============================================================================

/// Deterministic backend that replays a scripted sequence of responses.
///
/// Each call to [`GenerationBackend::generate`] consumes the next scripted
/// response; once the script is exhausted every further call fails with
/// [`PipelineError::Generation`]. An empty script therefore doubles as a
/// backend-failure injector.
pub struct CannedBackend {
    script: Mutex<VecDeque<String>>,
}

impl CannedBackend {
    /// Create a backend replaying `responses` in order.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
        }
    }

    /// Script covering one full analysis run, for offline smoke testing.
    pub fn demo() -> Self {
        Self::new(vec![
            r#"["High response time affecting customer satisfaction",
                "Low resolution rate for technical issues",
                "Inconsistent answer quality across agents"]"#
                .to_string(),
            r#"{"proposals": [
                {"hypothesis": "Introduce response templates for the top 10 intents",
                 "intervention": "prompt_change", "expected_impact": 0.15},
                {"hypothesis": "Fine-tune an adapter on resolved-ticket transcripts",
                 "intervention": "adapter_training", "expected_impact": 0.22}]}"#
                .to_string(),
            r#"{"success_rate": 0.82, "improvement": 0.11, "risks": ["Template drift"]}"#
                .to_string(),
            r#"{"success_rate": 0.64, "improvement": 0.05, "risks": ["Training cost"]}"#
                .to_string(),
        ])
    }
}

#[async_trait]
impl GenerationBackend for CannedBackend {
    async fn generate(
        &self,
        _prompt: &str,
        _max_output_tokens: u32,
    ) -> Result<String, PipelineError> {
        let next = self
            .script
            .lock()
            .map_err(|_| PipelineError::Other("canned script lock poisoned".to_string()))?
            .pop_front();

        next.ok_or_else(|| PipelineError::Generation("canned script exhausted".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_backend_replays_script_in_order() {
        let backend = CannedBackend::new(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(backend.generate("p", 10).await.unwrap(), "first");
        assert_eq!(backend.generate("p", 10).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_canned_backend_errors_when_exhausted() {
        let backend = CannedBackend::new(vec![]);
        let err = backend.generate("p", 10).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[test]
    fn test_openai_backend_requires_api_key() {
        std::env::remove_var("OPENAI_API_KEY");
        let result = OpenAiBackend::new("gpt-3.5-turbo");
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
