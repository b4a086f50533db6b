use crate::core::config::{ImageConfig, RenderConfig};
use crate::core::error::StoryError;
use crate::core::io::Storage;
use crate::core::state::{MediaRef, VisualStyle};
use crate::services::jobs::{JobKind, JobOutcome, JobPoller, JobService};
use crate::services::leonardo::{ImageRequest, MotionRequest};
use crate::services::prompts::QUALITY_SUFFIX;
use crate::services::render::{RenderRequest, StillRenderer};
use anyhow::Result;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Image and motion generation for single scenes, with retry and fallback.
pub struct MediaGenerator {
    images: JobPoller<ImageRequest>,
    motion: JobPoller<MotionRequest>,
    renderer: Arc<dyn StillRenderer>,
    storage: Arc<dyn Storage>,
    max_retries: usize,
    clip_seconds: u32,
    frame_rate: u32,
}

fn unfinished(job_id: &str, outcome: JobOutcome) -> anyhow::Error {
    match outcome {
        JobOutcome::TimedOut => StoryError::JobTimedOut(job_id.to_string()).into(),
        _ => StoryError::JobFailed(job_id.to_string()).into(),
    }
}

impl MediaGenerator {
    pub fn new(
        image_service: Arc<dyn JobService<ImageRequest>>,
        motion_service: Arc<dyn JobService<MotionRequest>>,
        renderer: Arc<dyn StillRenderer>,
        storage: Arc<dyn Storage>,
        images: &ImageConfig,
        render: &RenderConfig,
    ) -> Self {
        let interval = Duration::from_secs(images.poll_interval_seconds);
        let max_wait = Duration::from_secs(images.max_wait_seconds);
        Self {
            images: JobPoller::new(image_service, JobKind::Image, interval, max_wait),
            motion: JobPoller::new(motion_service, JobKind::Motion, interval, max_wait),
            renderer,
            storage,
            max_retries: images.max_retries,
            clip_seconds: render.duration_seconds,
            frame_rate: render.frame_rate,
        }
    }

    /// Generates one image and stores it at `path`. Returns `None` once the
    /// original attempt and every retry have failed.
    pub async fn generate_image(&self, prompt: &str, style: VisualStyle, path: &Path) -> Option<MediaRef> {
        for attempt in 0..=self.max_retries {
            let prompt = if attempt == 0 {
                prompt.to_string()
            } else {
                format!("{}{}", prompt, QUALITY_SUFFIX)
            };
            let request = ImageRequest { prompt, style };

            match self.try_image(&request, path).await {
                Ok(media) => return Some(media),
                Err(e) => warn!(
                    "Image attempt {}/{} for {} failed: {:#}",
                    attempt + 1,
                    self.max_retries + 1,
                    path.display(),
                    e
                ),
            }
        }
        warn!("Giving up on image {}", path.display());
        None
    }

    async fn try_image(&self, request: &ImageRequest, path: &Path) -> Result<MediaRef> {
        let (job, outcome) = self.images.run(request).await?;
        let JobOutcome::Complete { url, asset_id } = outcome else {
            return Err(unfinished(&job.id, outcome));
        };

        let bytes = self.images.fetch(&url).await?;
        self.storage.write(path, &bytes).await?;
        info!("Saved image {}", path.display());
        Ok(MediaRef {
            job_id: Some(job.id),
            url: Some(url),
            asset_id,
            path: Some(path.to_path_buf()),
        })
    }

    /// Animates a generated image into a clip at `path`. Falls back to a
    /// still clip when motion generation does not produce a video; only a
    /// failed fallback is an error.
    pub async fn generate_motion(&self, image: &MediaRef, path: &Path) -> Result<MediaRef> {
        let image_path = image
            .path
            .as_deref()
            .ok_or_else(|| StoryError::EncodeFailed("image has no local file".into()))?;

        match image.asset_id.as_deref() {
            Some(image_id) => match self.try_motion(image_id, path).await {
                Ok(media) => return Ok(media),
                Err(e) => warn!("Motion for {} failed, rendering still clip: {:#}", path.display(), e),
            },
            None => info!("{} has no remote asset, rendering still clip", image_path.display()),
        }

        self.render_still(image_path, path).await
    }

    async fn try_motion(&self, image_id: &str, path: &Path) -> Result<MediaRef> {
        let request = MotionRequest {
            image_id: image_id.to_string(),
        };
        let (job, outcome) = self.motion.run(&request).await?;
        let JobOutcome::Complete { url, asset_id } = outcome else {
            return Err(unfinished(&job.id, outcome));
        };

        let bytes = self.motion.fetch(&url).await?;
        self.storage.write(path, &bytes).await?;
        info!("Saved motion clip {}", path.display());
        Ok(MediaRef {
            job_id: Some(job.id),
            url: Some(url),
            asset_id,
            path: Some(path.to_path_buf()),
        })
    }

    async fn render_still(&self, image_path: &Path, path: &Path) -> Result<MediaRef> {
        let request = RenderRequest {
            input_image: image_path.to_path_buf(),
            output_video: path.to_path_buf(),
            duration_seconds: self.clip_seconds,
            frame_rate: self.frame_rate,
        };
        if let Err(e) = self.renderer.render(&request).await {
            return Err(match StoryError::classify(&e) {
                Some(StoryError::EncodeFailed(_)) => e,
                _ => StoryError::EncodeFailed(format!("{:#}", e)).into(),
            });
        }
        Ok(MediaRef::local(path.to_path_buf()))
    }
}
