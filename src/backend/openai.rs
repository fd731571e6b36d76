//! OpenAI backend implementation.
//!
//! A native engine: samples are embedded with the embeddings API and kept in
//! the local [`StyleStore`]; generation retrieves the closest samples by
//! cosine similarity and asks a chat model to write in that style.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::store::StyleStore;
use super::StyleBackend;
use crate::error::{Error, Result};
use crate::protocol::Reply;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// How many stored samples go into a generation prompt.
const STYLE_CONTEXT_SAMPLES: usize = 3;

const TEMPERATURE: f32 = 0.7;

/// OpenAI-backed style engine.
pub struct OpenAIBackend {
    pub model: String,
    embedding_model: String,
    api_key: Option<String>,
    base_url: String,
    store: StyleStore,
    client: Client,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend.
    pub fn new(
        model: String,
        embedding_model: String,
        api_key: Option<String>,
        store: StyleStore,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            model,
            embedding_model,
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            store,
            client,
        })
    }

    /// Point the backend at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Get the API key from config or environment.
    fn get_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                Error::api(
                    "OpenAI API key not found. Set OPENAI_API_KEY environment variable \
                     or add api_key to config file.",
                )
            })
    }

    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.get_api_key()?;
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_failure("embeddings", response).await);
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != input.len() {
            return Err(Error::api(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let api_key = self.get_api_key()?;
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_failure("chat", response).await);
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| Error::api("Empty response from OpenAI"))
    }

    /// Stored samples closest to the prompt embedding, best first.
    async fn style_context(&self, user_id: &str, prompt_embedding: &[f32]) -> Result<Vec<String>> {
        let mut scored: Vec<(f32, String)> = self
            .store
            .entries(user_id)
            .await?
            .into_iter()
            .map(|e| (cosine_similarity(prompt_embedding, &e.embedding), e.text))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(STYLE_CONTEXT_SAMPLES)
            .map(|(_, text)| text)
            .collect())
    }
}

#[async_trait]
impl StyleBackend for OpenAIBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn seed(&self, user_id: &str, samples: &[String]) -> Result<Reply> {
        require("user_id", user_id)?;
        if samples.is_empty() || samples.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::invalid_input("samples must be a list of non-empty strings"));
        }

        info!("Seeding style for user '{}' with {} samples", user_id, samples.len());
        let embeddings = self.embed(samples).await?;
        for (text, embedding) in samples.iter().zip(embeddings) {
            self.store.add(user_id, text, embedding).await?;
        }

        Ok(Reply::text(format!(
            "Seeded style for user '{}' with {} samples.",
            user_id,
            samples.len()
        )))
    }

    async fn generate(&self, user_id: &str, prompt: &str) -> Result<Reply> {
        require("user_id", user_id)?;
        require("prompt", prompt)?;

        let prompt_embedding = self
            .embed(&[prompt.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::api("Empty embedding response"))?;

        let context = self.style_context(user_id, &prompt_embedding).await?;
        if context.is_empty() {
            return Err(Error::NoStyle {
                user_id: user_id.to_string(),
            });
        }

        let full_prompt = style_prompt(&context, prompt);
        debug!("Generation prompt for '{}':\n{}", user_id, full_prompt);
        Ok(Reply::text(self.chat(&full_prompt).await?))
    }

    async fn summarize_nudges(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply> {
        require("user_id", user_id)?;
        require("prompt", prompt)?;
        require_nudges(nudges)?;

        let full_prompt = nudge_summary_prompt(prompt, nudges);
        debug!("Nudge summary prompt for '{}':\n{}", user_id, full_prompt);
        Ok(Reply::text(self.chat(&full_prompt).await?))
    }

    async fn draft_nudge_email(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply> {
        require("user_id", user_id)?;
        require("prompt", prompt)?;
        require_nudges(nudges)?;

        let full_prompt = nudge_email_prompt(prompt, nudges);
        debug!("Nudge email prompt for '{}':\n{}", user_id, full_prompt);
        Ok(Reply::text(self.chat(&full_prompt).await?))
    }

    async fn forget(&self, user_id: &str) -> Result<Reply> {
        require("user_id", user_id)?;
        self.store.clear(user_id).await?;
        Ok(Reply::text(format!("Cleared stored style for user '{}'.", user_id)))
    }

    async fn health_check(&self) -> Result<()> {
        // Just verify we have an API key
        self.get_api_key()?;
        Ok(())
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_input(format!("{} must be a non-empty string", name)));
    }
    Ok(())
}

fn require_nudges(nudges: &[String]) -> Result<()> {
    if nudges.is_empty() {
        return Err(Error::invalid_input("at least one nudge is required"));
    }
    Ok(())
}

async fn api_failure(what: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body: std::result::Result<OpenAIError, _> = response.json().await;
    let message = body
        .map(|e| e.error.message)
        .unwrap_or_else(|_| "Unknown error".to_string());
    Error::api(format!(
        "OpenAI {} request failed with status {}: {}",
        what, status, message
    ))
}

/// Cosine similarity; zero when either vector has no length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn style_prompt(samples: &[String], user_prompt: &str) -> String {
    format!(
        "You are an assistant that writes emails in the user's personal style.\n\n\
         Here are some examples of the user's writing style:\n\n\
         {}\n\n\
         Now write an email based on the following prompt:\n\n\
         {}",
        samples.join("\n\n"),
        user_prompt
    )
}

/// A nudge is either free text or a JSON object with these fields.
#[derive(Debug, Deserialize)]
struct Nudge {
    title: String,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    metrics: serde_json::Value,
}

fn describe_nudge(raw: &str, separator: &str) -> String {
    match serde_json::from_str::<Nudge>(raw) {
        Ok(nudge) => format!(
            "Title: {}{}Instructions: {}{}Metrics: {}",
            nudge.title, separator, nudge.instructions, separator, nudge.metrics
        ),
        Err(_) => raw.to_string(),
    }
}

fn nudge_summary_prompt(prompt: &str, nudges: &[String]) -> String {
    let lines: Vec<String> = nudges.iter().map(|n| describe_nudge(n, ", ")).collect();
    format!("Prompt: {}\n\nNudges:\n{}", prompt, lines.join("\n"))
}

fn nudge_email_prompt(prompt: &str, nudges: &[String]) -> String {
    let blocks: Vec<String> = nudges.iter().map(|n| describe_nudge(n, "\n")).collect();
    format!(
        "{}\n\nNudges for the employee:\n{}\n\n\
         Write a complete and polished email to the employee addressing the nudges. \
         The email should be professional, concise, and provide clear next steps. \
         The nudges are things the writer needs to do for their team member and this \
         email is them addressing them and reaching out to their team member. \
         Start with a line of the form 'Subject: <subject>'.",
        prompt,
        blocks.join("\n\n")
    )
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}
