use crate::core::config::ImageConfig;
use crate::core::error::StoryError;
use crate::core::state::VisualStyle;
use crate::services::jobs::{JobService, RemoteState, RemoteStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::fmt::Display;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub style: VisualStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionRequest {
    /// Remote id of the generated still to animate.
    pub image_id: String,
}

pub fn style_uuid(style: VisualStyle) -> &'static str {
    match style {
        VisualStyle::Render3D => "debdf72a-91a4-467b-bf61-cc02bdeb69c6",
        VisualStyle::Acrylic => "3cbb655a-7ca4-463f-b697-8a03ad67327c",
        VisualStyle::AnimeGeneral => "b2a54a51-230b-4d4f-ad4e-8409bf58645f",
        VisualStyle::Creative => "6fedbf1f-4a17-45ec-84fb-92fe524a29ef",
        VisualStyle::Dynamic => "111dc692-d470-4eec-b791-3475abac4c46",
        VisualStyle::Fashion => "594c4a08-a522-4e0e-b7ff-e4dac4b6b622",
        VisualStyle::GameConcept => "09d2b5b5-d7c5-4c02-905d-9f84051640f4",
        VisualStyle::GraphicDesign3D => "7d7c2bc5-4b12-4ac3-81a9-630057e9e89f",
        VisualStyle::Illustration => "645e4195-f63d-4715-a3f2-3fb1e6eb8c70",
        VisualStyle::None => "556c1ee5-ec38-42e8-955a-1e82dad0ffa1",
        VisualStyle::Portrait => "8e2bc543-6ee2-45f9-bcd9-594b6ce84dcd",
        VisualStyle::PortraitCinematic => "4edb03c9-8a26-4041-9d01-f85b5d4abd71",
        VisualStyle::RayTraced => "b504f83c-3326-4947-82e1-7fe9e839ec0f",
        VisualStyle::StockPhoto => "5bdc3f2a-1be6-4d1c-8e77-992a30824a2c",
        VisualStyle::Watercolor => "1db308ce-c7ad-4d10-96fd-592fa6b75cc4",
    }
}

/// Leonardo REST client serving both still and motion generations.
pub struct LeonardoClient {
    api_key: String,
    base_url: String,
    model_id: String,
    width: u32,
    height: u32,
    guidance_scale: u32,
    motion_strength: u32,
    client: reqwest::Client,
}

fn remote(e: impl Display) -> anyhow::Error {
    StoryError::RemoteUnavailable(format!("Leonardo: {}", e)).into()
}

impl LeonardoClient {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| StoryError::Configuration("Leonardo API key missing".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()
            .context("Failed to build Leonardo HTTP client")?;
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            width: config.width,
            height: config.height,
            guidance_scale: config.guidance_scale,
            motion_strength: config.motion_strength,
            client,
        })
    }

    fn image_body(&self, request: &ImageRequest) -> Value {
        json!({
            "prompt": request.prompt,
            "modelId": self.model_id,
            "width": self.width,
            "height": self.height,
            "num_images": 1,
            "guidance_scale": self.guidance_scale,
            "styleUUID": style_uuid(request.style),
        })
    }

    fn motion_body(&self, request: &MotionRequest) -> Value {
        json!({
            "imageId": request.image_id,
            "motionStrength": self.motion_strength,
            "isPublic": false,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let resp = request
            .header("accept", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(remote)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(remote(format!("API error {}: {}", status, error_text)));
        }
        resp.json().await.map_err(remote)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("POST {} {}", url, body);
        self.send(self.client.post(&url).json(&body)).await
    }

    async fn get_generation(&self, job_id: &str) -> Result<Value> {
        let url = format!("{}/generations/{}", self.base_url, job_id);
        self.send(self.client.get(&url)).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await.map_err(remote)?;
        if !resp.status().is_success() {
            return Err(remote(format!("download {} returned {}", url, resp.status())));
        }
        let bytes = resp.bytes().await.map_err(remote)?;
        Ok(bytes.to_vec())
    }
}

fn parse_job_id(body: &Value, job_key: &str) -> Result<String> {
    body.get(job_key)
        .and_then(|job| job.get("generationId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoryError::SubmissionFailed(format!("response has no {}.generationId", job_key)).into())
}

fn first_image(body: &Value) -> (Option<&str>, Option<&Value>) {
    let generation = body
        .get("generations_by_pk")
        .or_else(|| body.get("generations_motion_by_pk"));
    let status = generation
        .and_then(|g| g.get("status"))
        .and_then(Value::as_str);
    let image = generation
        .and_then(|g| g.get("generated_images"))
        .and_then(|images| images.get(0));
    (status, image)
}

fn string_field(image: Option<&Value>, key: &str) -> Option<String> {
    image
        .and_then(|i| i.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_image_status(body: &Value) -> RemoteStatus {
    let (status, image) = first_image(body);
    RemoteStatus {
        state: RemoteState::parse(status.unwrap_or_default()),
        result_url: string_field(image, "url"),
        asset_id: string_field(image, "id"),
    }
}

fn parse_motion_status(body: &Value) -> RemoteStatus {
    let (status, image) = first_image(body);
    RemoteStatus {
        state: RemoteState::parse(status.unwrap_or_default()),
        result_url: string_field(image, "motionMP4URL"),
        asset_id: string_field(image, "id"),
    }
}

#[async_trait]
impl JobService<ImageRequest> for LeonardoClient {
    async fn submit(&self, request: &ImageRequest) -> Result<String> {
        let body = self.post("generations", self.image_body(request)).await?;
        parse_job_id(&body, "sdGenerationJob")
    }

    async fn poll(&self, job_id: &str) -> Result<RemoteStatus> {
        let body = self.get_generation(job_id).await?;
        Ok(parse_image_status(&body))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.download(url).await
    }
}

#[async_trait]
impl JobService<MotionRequest> for LeonardoClient {
    async fn submit(&self, request: &MotionRequest) -> Result<String> {
        let body = self
            .post("generations-motion-svd", self.motion_body(request))
            .await?;
        parse_job_id(&body, "motionSvdGenerationJob")
    }

    async fn poll(&self, job_id: &str) -> Result<RemoteStatus> {
        let body = self.get_generation(job_id).await?;
        Ok(parse_motion_status(&body))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.download(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LeonardoClient {
        let config = ImageConfig {
            api_key: Some("leo-test".into()),
            ..ImageConfig::default()
        };
        LeonardoClient::new(&config).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let err = LeonardoClient::new(&ImageConfig::default()).err().unwrap();
        assert!(matches!(
            StoryError::classify(&err),
            Some(StoryError::Configuration(_))
        ));
    }

    #[test]
    fn test_image_body() {
        let body = client().image_body(&ImageRequest {
            prompt: "a lighthouse in a storm".into(),
            style: VisualStyle::Watercolor,
        });
        assert_eq!(body["modelId"], "1dd50843-d653-4516-a8e3-f0238ee453ff");
        assert_eq!(body["width"], 512);
        assert_eq!(body["height"], 512);
        assert_eq!(body["guidance_scale"], 7);
        assert_eq!(body["num_images"], 1);
        assert_eq!(body["styleUUID"], "1db308ce-c7ad-4d10-96fd-592fa6b75cc4");
    }

    #[test]
    fn test_motion_body() {
        let body = client().motion_body(&MotionRequest {
            image_id: "img-42".into(),
        });
        assert_eq!(body, json!({"imageId": "img-42", "motionStrength": 5, "isPublic": false}));
    }

    #[test]
    fn test_style_uuids_are_distinct() {
        let ids: std::collections::HashSet<_> = VisualStyle::ALL.iter().map(|s| style_uuid(*s)).collect();
        assert_eq!(ids.len(), VisualStyle::ALL.len());
    }

    #[test]
    fn test_parse_job_id() {
        let body = json!({"sdGenerationJob": {"generationId": "gen-1", "apiCreditCost": 3}});
        assert_eq!(parse_job_id(&body, "sdGenerationJob").unwrap(), "gen-1");

        let err = parse_job_id(&json!({"error": "quota"}), "sdGenerationJob").unwrap_err();
        assert!(matches!(
            StoryError::classify(&err),
            Some(StoryError::SubmissionFailed(_))
        ));
    }

    #[test]
    fn test_parse_image_status() {
        let pending = json!({"generations_by_pk": {"status": "PENDING", "generated_images": []}});
        assert_eq!(parse_image_status(&pending), RemoteStatus::pending());

        let complete = json!({
            "generations_by_pk": {
                "status": "COMPLETE",
                "generated_images": [
                    {"id": "img-7", "url": "https://cdn.leonardo.ai/users/u/generations/g/a.jpg"}
                ]
            }
        });
        assert_eq!(
            parse_image_status(&complete),
            RemoteStatus::complete(
                "https://cdn.leonardo.ai/users/u/generations/g/a.jpg",
                Some("img-7")
            )
        );

        let failed = json!({"generations_by_pk": {"status": "FAILED"}});
        assert_eq!(parse_image_status(&failed).state, RemoteState::Failed);
    }

    #[test]
    fn test_parse_motion_status() {
        let complete = json!({
            "generations_by_pk": {
                "status": "COMPLETE",
                "generated_images": [
                    {"id": "img-7", "motionMP4URL": "https://cdn.leonardo.ai/motion/a.mp4"}
                ]
            }
        });
        let status = parse_motion_status(&complete);
        assert_eq!(status.state, RemoteState::Complete);
        assert_eq!(status.result_url.as_deref(), Some("https://cdn.leonardo.ai/motion/a.mp4"));

        let deleted = json!({"generations_motion_by_pk": {"status": "DELETED"}});
        assert_eq!(parse_motion_status(&deleted).state, RemoteState::Deleted);
    }
}
