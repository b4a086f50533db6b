use crate::core::config::Config;
use crate::core::error::StoryError;
use crate::core::state::Role;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Speaks `text` with `voice` and returns encoded MP3 bytes.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

pub fn voice_for_role(role: Role) -> &'static str {
    match role {
        Role::Narrator => "fable",
        Role::Child => "nova",
        Role::Elder => "onyx",
        Role::Fae => "shimmer",
        Role::Hero => "alloy",
        Role::Villain => "echo",
        Role::Sage => "onyx",
        Role::Sidekick => "nova",
    }
}

pub fn create_tts_client(config: &Config) -> Result<Arc<dyn TtsClient>> {
    let api_key = config
        .tts
        .api_key
        .as_deref()
        .ok_or_else(|| StoryError::Configuration("TTS API key missing".into()))?;
    Ok(Arc::new(OpenAiTts::new(
        api_key,
        &config.tts.base_url,
        &config.tts.model,
    )))
}

pub struct OpenAiTts {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

impl OpenAiTts {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

fn remote(e: impl std::fmt::Display) -> anyhow::Error {
    StoryError::RemoteUnavailable(format!("TTS: {}", e)).into()
}

#[async_trait]
impl TtsClient for OpenAiTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = SpeechRequest {
            model: &self.model,
            voice,
            input: text,
            response_format: "mp3",
        };
        debug!("TTS request voice={} ({} chars)", voice, text.len());

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(remote)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(remote(format!("API error {}: {}", status, error_text)));
        }

        let bytes = resp.bytes().await.map_err(remote)?;
        Ok(bytes.to_vec())
    }
}
