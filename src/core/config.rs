use crate::core::error::StoryError;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const LEONARDO_API_KEY_ENV: &str = "LEONARDO_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default)]
    pub extract_characters: bool,
    #[serde(default)]
    pub generate_voiceover: bool,
    #[serde(default)]
    pub generate_images: bool,
    #[serde(default)]
    pub generate_motion: bool,
    #[serde(default)]
    pub save_script: bool,
    #[serde(default = "default_keyframe_count")]
    pub keyframe_count: usize,
    #[serde(default = "default_output")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String, // "openai" or "ollama"
    /// Extra attempts for stages whose responses break a content contract.
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,
    #[serde(default)]
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_leonardo_url")]
    pub base_url: String,
    #[serde(default = "default_leonardo_model")]
    pub model_id: String,
    #[serde(default = "default_image_size")]
    pub width: u32,
    #[serde(default = "default_image_size")]
    pub height: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: u32,
    #[serde(default = "default_motion_strength")]
    pub motion_strength: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_image_retries")]
    pub max_retries: usize,
    /// Upper bound for a single Leonardo HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_clip_seconds")]
    pub duration_seconds: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_image_size")]
    pub frame_size: u32,
}

fn default_build() -> String {
    "build".to_string()
}
fn default_output() -> PathBuf {
    PathBuf::from("output")
}
fn default_keyframe_count() -> usize {
    4
}
fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_retry_count() -> usize {
    2
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_leonardo_url() -> String {
    "https://cloud.leonardo.ai/api/rest/v1".to_string()
}
fn default_leonardo_model() -> String {
    // Flux Schnell
    "1dd50843-d653-4516-a8e3-f0238ee453ff".to_string()
}
fn default_image_size() -> u32 {
    512
}
fn default_guidance_scale() -> u32 {
    7
}
fn default_motion_strength() -> u32 {
    5
}
fn default_poll_interval() -> u64 {
    5
}
fn default_max_wait() -> u64 {
    300
}
fn default_image_retries() -> usize {
    2
}
fn default_request_timeout() -> u64 {
    60
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_clip_seconds() -> u32 {
    5
}
fn default_frame_rate() -> u32 {
    24
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            extract_characters: false,
            generate_voiceover: false,
            generate_images: false,
            generate_motion: false,
            save_script: false,
            keyframe_count: default_keyframe_count(),
            output_dir: default_output(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            retry_count: default_retry_count(),
            openai: Some(OpenAIConfig {
                model: default_openai_model(),
                temperature: default_temperature(),
                ..Default::default()
            }),
            ollama: None,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_leonardo_url(),
            model_id: default_leonardo_model(),
            width: default_image_size(),
            height: default_image_size(),
            guidance_scale: default_guidance_scale(),
            motion_strength: default_motion_strength(),
            poll_interval_seconds: default_poll_interval(),
            max_wait_seconds: default_max_wait(),
            max_retries: default_image_retries(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_url(),
            model: default_tts_model(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            duration_seconds: default_clip_seconds(),
            frame_rate: default_frame_rate(),
            frame_size: default_image_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_folder: default_build(),
            run: RunConfig::default(),
            llm: LlmConfig::default(),
            images: ImageConfig::default(),
            tts: TtsConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Config {
    /// Reads `path` if present, otherwise starts from defaults. Credentials
    /// may still arrive through the environment, see [`Config::apply_env`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Fills unset API keys from the environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let openai_key = lookup(OPENAI_API_KEY_ENV).filter(|k| !k.is_empty());
        let leonardo_key = lookup(LEONARDO_API_KEY_ENV).filter(|k| !k.is_empty());

        if let Some(openai) = self.llm.openai.as_mut() {
            if openai.api_key.is_none() {
                openai.api_key = openai_key.clone();
            }
        }
        if self.tts.api_key.is_none() {
            self.tts.api_key = openai_key;
        }
        if self.images.api_key.is_none() {
            self.images.api_key = leonardo_key;
        }
    }

    /// Checks everything the enabled features need before any stage runs.
    pub fn validate(&self) -> Result<()> {
        if self.run.keyframe_count == 0 {
            return Err(StoryError::Configuration("keyframe_count must be at least 1".into()).into());
        }

        match self.llm.provider.as_str() {
            "openai" => {
                let cfg = self.llm.openai.as_ref().ok_or_else(|| {
                    StoryError::Configuration("llm.openai section missing".into())
                })?;
                if cfg.api_key.is_none() {
                    return Err(StoryError::Configuration(format!(
                        "OpenAI API key missing (set llm.openai.api_key or {})",
                        OPENAI_API_KEY_ENV
                    ))
                    .into());
                }
            }
            "ollama" => {
                if self.llm.ollama.is_none() {
                    return Err(StoryError::Configuration("llm.ollama section missing".into()).into());
                }
            }
            other => {
                return Err(
                    StoryError::Configuration(format!("Unknown LLM provider: {}", other)).into(),
                )
            }
        }

        if (self.run.generate_images || self.run.generate_motion) && self.images.api_key.is_none() {
            return Err(StoryError::Configuration(format!(
                "Leonardo API key missing (set images.api_key or {})",
                LEONARDO_API_KEY_ENV
            ))
            .into());
        }

        if self.run.generate_voiceover && self.tts.api_key.is_none() {
            return Err(StoryError::Configuration(format!(
                "TTS API key missing (set tts.api_key or {})",
                OPENAI_API_KEY_ENV
            ))
            .into());
        }

        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.run.output_dir)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }

    pub fn checkpoint_folder(&self) -> PathBuf {
        Path::new(&self.build_folder).join("checkpoints")
    }
}
