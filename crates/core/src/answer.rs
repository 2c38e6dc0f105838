use crate::error::{Result, RetrievalError};
use crate::models::{RetrievalOptions, RetrievalResult};
use crate::policy::AllowAll;
use crate::retriever::Retriever;
use crate::traits::{GenerativeBackend, QuestionPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub const NOT_ENOUGH_INFORMATION: &str = "I don't have enough information to answer that.";
pub const OUT_OF_SCOPE: &str = "I can only answer questions related to the indexed documents.";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

/// What the generator gets to ground its answer on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroundingContext<'a> {
    Empty,
    Chunks(&'a [RetrievalResult]),
}

impl<'a> GroundingContext<'a> {
    pub fn from_results(results: &'a [RetrievalResult]) -> Self {
        if results.is_empty() {
            Self::Empty
        } else {
            Self::Chunks(results)
        }
    }

    pub fn text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Chunks(results) => Some(
                results
                    .iter()
                    .map(|result| result.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a careful document assistant.\n\
         Answer the question strictly based on the given context.\n\
         If the answer is not in the context, say:\n\
         \"{NOT_ENOUGH_INFORMATION}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n"
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Grounded {
        text: String,
        sources: Vec<RetrievalResult>,
    },
    InsufficientContext,
    Declined,
}

impl Answer {
    pub fn message(&self) -> &str {
        match self {
            Self::Grounded { text, .. } => text,
            Self::InsufficientContext => NOT_ENOUGH_INFORMATION,
            Self::Declined => OUT_OF_SCOPE,
        }
    }
}

pub struct AnswerComposer {
    retriever: Retriever,
    backend: Arc<dyn GenerativeBackend>,
    policy: Arc<dyn QuestionPolicy>,
    options: RetrievalOptions,
}

impl AnswerComposer {
    pub fn new(retriever: Retriever, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            retriever,
            backend,
            policy: Arc::new(AllowAll),
            options: RetrievalOptions::default(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn QuestionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: RetrievalOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let results = self.retriever.retrieve_with(question, self.options).await?;

        if !self.policy.permits(question, !results.is_empty()) {
            info!(question, "question declined by policy");
            return Ok(Answer::Declined);
        }

        self.compose(question, GroundingContext::from_results(&results))
            .await
    }

    pub async fn compose(&self, question: &str, context: GroundingContext<'_>) -> Result<Answer> {
        let GroundingContext::Chunks(results) = context else {
            info!(question, "no grounding context, skipping generation");
            return Ok(Answer::InsufficientContext);
        };

        let context_text = context.text().unwrap_or_default();
        let prompt = build_prompt(&context_text, question);
        let text = self.backend.complete(&prompt).await.inspect_err(|error| {
            warn!(model = self.backend.model_id(), %error, "generation failed");
        })?;

        info!(
            model = self.backend.model_id(),
            context_chunks = results.len(),
            "answered question"
        );
        Ok(Answer::Grounded {
            text: text.trim().to_string(),
            sources: results.to_vec(),
        })
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiBackend {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_base_url(GEMINI_BASE_URL, api_key, model)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        let endpoint = Url::parse(base_url)?.join(&format!("models/{model}:generateContent"))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            model,
            api_key: api_key.into(),
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        })
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|error| RetrievalError::unavailable("gemini", error))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(RetrievalError::GenerationError(format!(
                "gemini returned {status}: {details}"
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| RetrievalError::GenerationError(error.to_string()))?;
        extract_candidate_text(&parsed)
    }
}

fn extract_candidate_text(parsed: &Value) -> Result<String> {
    let text = parsed
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = parsed
            .pointer("/promptFeedback/blockReason")
            .or_else(|| parsed.pointer("/candidates/0/finishReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(RetrievalError::GenerationError(format!(
            "gemini returned no text ({reason})"
        )));
    }

    Ok(text)
}
