use crate::core::config::RenderConfig;
use crate::core::error::StoryError;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Lines of encoder stderr kept in an `EncodeFailed` message.
const STDERR_TAIL_LINES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub input_image: PathBuf,
    pub output_video: PathBuf,
    pub duration_seconds: u32,
    pub frame_rate: u32,
}

/// Turns one still image into a short clip. Used when motion generation
/// is unavailable for a scene.
#[async_trait]
pub trait StillRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<()>;
}

pub struct FfmpegRenderer {
    binary: String,
    frame_size: u32,
}

impl FfmpegRenderer {
    pub fn new(binary: &str, frame_size: u32) -> Self {
        Self {
            binary: binary.to_string(),
            frame_size,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(&config.ffmpeg_path, config.frame_size)
    }

    pub fn args(&self, request: &RenderRequest) -> Vec<String> {
        let size = self.frame_size;
        let filter = format!(
            "scale={size}:{size}:force_original_aspect_ratio=decrease,\
             pad={size}:{size}:(ow-iw)/2:(oh-ih)/2:color=black,format=yuv420p"
        );
        vec![
            "-y".into(),
            "-loop".into(),
            "1".into(),
            "-i".into(),
            request.input_image.display().to_string(),
            "-t".into(),
            request.duration_seconds.to_string(),
            "-r".into(),
            request.frame_rate.to_string(),
            "-vf".into(),
            filter,
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            request.output_video.display().to_string(),
        ]
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl StillRenderer for FfmpegRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<()> {
        let args = self.args(request);
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StoryError::EncodeFailed(format!("could not start {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(StoryError::EncodeFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr_tail(&output.stderr)
            ))
            .into());
        }

        info!("Rendered still clip {}", request.output_video.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RenderRequest {
        RenderRequest {
            input_image: PathBuf::from("out/keyframe_1_2.jpg"),
            output_video: PathBuf::from("out/keyframe_1_2.mp4"),
            duration_seconds: 5,
            frame_rate: 24,
        }
    }

    #[test]
    fn test_args_loop_still_into_square_frame() {
        let renderer = FfmpegRenderer::from_config(&RenderConfig::default());
        let args = renderer.args(&request());

        assert_eq!(&args[..5], &["-y", "-loop", "1", "-i", "out/keyframe_1_2.jpg"]);
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-t") + 1], "5");
        assert_eq!(args[pos("-r") + 1], "24");
        assert_eq!(args[pos("-c:v") + 1], "libx264");
        assert_eq!(args[pos("-pix_fmt") + 1], "yuv420p");

        let filter = &args[pos("-vf") + 1];
        assert!(filter.starts_with("scale=512:512:force_original_aspect_ratio=decrease,"));
        assert!(filter.contains("pad=512:512:(ow-iw)/2:(oh-ih)/2:color=black"));
        assert_eq!(args.last().map(String::as_str), Some("out/keyframe_1_2.mp4"));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (1..=20).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 13"));
        assert!(tail.ends_with("line 20"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_encode_failed() {
        let renderer = FfmpegRenderer::new("/nonexistent/ffmpeg-binary", 512);
        let err = renderer.render(&request()).await.unwrap_err();
        assert!(matches!(
            StoryError::classify(&err),
            Some(StoryError::EncodeFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_encode_failed() {
        let renderer = FfmpegRenderer::new("false", 512);
        let err = renderer.render(&request()).await.unwrap_err();
        match StoryError::classify(&err) {
            Some(StoryError::EncodeFailed(msg)) => assert!(msg.contains("exited with")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
