use crate::core::config::Config;
use crate::core::error::StoryError;
use crate::utils::text::{preview, strip_code_blocks};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Debug, Display};
use std::sync::Arc;

/// JSON schema a structured completion has to satisfy.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Raw completion text. Providers that support it are asked to conform
    /// to `schema`; callers still validate, see [`complete_structured`].
    async fn complete(&self, prompt: &str, schema: Option<&ResponseSchema>) -> Result<String>;
}

/// A response type with a declared schema and content rules beyond it.
pub trait StructuredResponse: DeserializeOwned {
    fn schema() -> ResponseSchema;

    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

pub async fn complete_text(llm: &dyn LlmClient, prompt: &str) -> Result<String> {
    let text = llm.complete(prompt, None).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(StoryError::SchemaViolation("empty completion".into()).into());
    }
    Ok(text.to_string())
}

pub async fn complete_structured<T: StructuredResponse>(llm: &dyn LlmClient, prompt: &str) -> Result<T> {
    let schema = T::schema();
    let raw = llm.complete(prompt, Some(&schema)).await?;
    let clean = strip_code_blocks(&raw);

    let parsed: T = serde_json::from_str(&clean).map_err(|e| {
        StoryError::SchemaViolation(format!(
            "{} response does not match schema: {}. Body: {}",
            schema.name,
            e,
            preview(&clean, 200)
        ))
    })?;
    parsed
        .validate()
        .map_err(|msg| StoryError::SchemaViolation(format!("{}: {}", schema.name, msg)))?;
    Ok(parsed)
}

pub fn create_llm(config: &Config) -> Result<Arc<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "openai" => {
            let cfg = config
                .llm
                .openai
                .as_ref()
                .ok_or_else(|| StoryError::Configuration("OpenAI config missing".into()))?;
            let api_key = cfg
                .api_key
                .as_deref()
                .ok_or_else(|| StoryError::Configuration("OpenAI API key missing".into()))?;
            Ok(Arc::new(OpenAIClient::new(
                api_key,
                &cfg.model,
                cfg.base_url.as_deref(),
                cfg.temperature,
            )))
        }
        "ollama" => {
            let cfg = config
                .llm
                .ollama
                .as_ref()
                .ok_or_else(|| StoryError::Configuration("Ollama config missing".into()))?;
            Ok(Arc::new(OllamaClient::new(&cfg.base_url, &cfg.model)))
        }
        other => Err(StoryError::Configuration(format!("Unknown LLM provider: {}", other)).into()),
    }
}

fn remote(provider: &str, e: impl Display) -> anyhow::Error {
    StoryError::RemoteUnavailable(format!("{}: {}", provider, e)).into()
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>, temperature: f32) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, prompt: &str, schema: Option<&ResponseSchema>) -> OpenAIRequest {
        OpenAIRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            response_format: schema.map(|s| {
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": s.name,
                        "schema": s.schema,
                        "strict": true,
                    }
                })
            }),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn extract_openai_content(result: OpenAIResponse) -> Result<String> {
    let Some(choice) = result.choices.into_iter().next() else {
        return Err(anyhow!(StoryError::SchemaViolation(
            "OpenAI response has no choices".into()
        )));
    };
    if let Some(refusal) = choice.message.refusal {
        return Err(StoryError::SchemaViolation(format!("model refused: {}", refusal)).into());
    }
    choice
        .message
        .content
        .ok_or_else(|| StoryError::SchemaViolation("OpenAI response missing content".into()).into())
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, prompt: &str, schema: Option<&ResponseSchema>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request_body = self.build_request(prompt, schema);

        debug!("OpenAI request ({} chars, schema: {:?})", prompt.len(), schema.map(|s| s.name));

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| remote("OpenAI", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(remote("OpenAI", format!("API error {}: {}", status, error_text)));
        }

        let response_text = resp.text().await.map_err(|e| remote("OpenAI", e))?;
        let result: OpenAIResponse = serde_json::from_str(&response_text)
            .map_err(|e| remote("OpenAI", format!("unreadable response: {}", e)))?;
        let content = extract_openai_content(result)?;

        debug!("OpenAI response: {}", preview(&content, 500));
        Ok(content)
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str, schema: Option<&ResponseSchema>) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            format: schema.map(|s| s.schema.clone()),
        };

        let resp = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| remote("Ollama", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(remote("Ollama", format!("API error {}: {}", status, error_text)));
        }

        let result: OllamaResponse = resp.json().await.map_err(|e| remote("Ollama", e))?;
        Ok(result.message.content)
    }
}
