use crate::core::error::StoryError;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Image,
    Motion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Polling,
    Complete,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// Status word reported by a remote generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Pending,
    Complete,
    Failed,
    Deleted,
}

impl RemoteState {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => RemoteState::Complete,
            "FAILED" => RemoteState::Failed,
            "DELETED" => RemoteState::Deleted,
            _ => RemoteState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub state: RemoteState,
    pub result_url: Option<String>,
    pub asset_id: Option<String>,
}

impl RemoteStatus {
    pub fn pending() -> Self {
        Self {
            state: RemoteState::Pending,
            result_url: None,
            asset_id: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            state: RemoteState::Failed,
            ..Self::pending()
        }
    }

    pub fn complete(url: &str, asset_id: Option<&str>) -> Self {
        Self {
            state: RemoteState::Complete,
            result_url: Some(url.to_string()),
            asset_id: asset_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Complete { url: String, asset_id: Option<String> },
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: String,
    pub kind: JobKind,
    pub submitted_at: Instant,
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub asset_id: Option<String>,
}

impl GenerationJob {
    fn new(id: String, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            submitted_at: Instant::now(),
            status: JobStatus::Submitted,
            result_url: None,
            asset_id: None,
        }
    }

    /// The recorded outcome, once the job is terminal.
    pub fn outcome(&self) -> Option<JobOutcome> {
        if !self.status.is_terminal() {
            return None;
        }
        Some(match (self.status, &self.result_url) {
            (JobStatus::Complete, Some(url)) => JobOutcome::Complete {
                url: url.clone(),
                asset_id: self.asset_id.clone(),
            },
            (JobStatus::TimedOut, _) => JobOutcome::TimedOut,
            _ => JobOutcome::Failed,
        })
    }

    fn finish(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Complete { url, asset_id } => {
                self.status = JobStatus::Complete;
                self.result_url = Some(url.clone());
                self.asset_id = asset_id.clone();
            }
            JobOutcome::Failed => self.status = JobStatus::Failed,
            JobOutcome::TimedOut => self.status = JobStatus::TimedOut,
        }
    }
}

/// A remote service that runs generation jobs asynchronously.
#[async_trait]
pub trait JobService<R: Sync>: Send + Sync {
    async fn submit(&self, request: &R) -> Result<String>;
    async fn poll(&self, job_id: &str) -> Result<RemoteStatus>;
    /// Downloads a finished artifact.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Absolute http(s) URL or nothing.
fn usable_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = Url::parse(raw).ok()?;
    let web = matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some();
    web.then(|| raw.to_string())
}

fn interpret(job_id: &str, status: RemoteStatus) -> Option<JobOutcome> {
    match status.state {
        RemoteState::Pending => None,
        RemoteState::Failed | RemoteState::Deleted => Some(JobOutcome::Failed),
        RemoteState::Complete => match status.result_url.as_deref().and_then(usable_url) {
            Some(url) => Some(JobOutcome::Complete {
                url,
                asset_id: status.asset_id,
            }),
            None => {
                warn!("Job {} reported COMPLETE without a usable result URL", job_id);
                Some(JobOutcome::Failed)
            }
        },
    }
}

/// Submit-then-poll driver shared by image and motion generation.
pub struct JobPoller<R: Sync> {
    service: Arc<dyn JobService<R>>,
    kind: JobKind,
    interval: Duration,
    max_wait: Duration,
}

impl<R: Sync> JobPoller<R> {
    pub fn new(service: Arc<dyn JobService<R>>, kind: JobKind, interval: Duration, max_wait: Duration) -> Self {
        Self {
            service,
            kind,
            interval,
            max_wait,
        }
    }

    pub async fn submit(&self, request: &R) -> Result<GenerationJob> {
        let id = self
            .service
            .submit(request)
            .await
            .map_err(|e| StoryError::SubmissionFailed(format!("{:?} job: {:#}", self.kind, e)))?;
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(StoryError::SubmissionFailed(format!("{:?} job: empty job id", self.kind)).into());
        }
        debug!("Submitted {:?} job {}", self.kind, id);
        Ok(GenerationJob::new(id, self.kind))
    }

    /// Polls until the job is terminal or `max_wait` has elapsed since
    /// submission. A job that is already terminal is not polled again.
    pub async fn poll_until_terminal(&self, job: &mut GenerationJob) -> JobOutcome {
        if let Some(outcome) = job.outcome() {
            return outcome;
        }
        job.status = JobStatus::Polling;

        loop {
            let remaining = self.max_wait.saturating_sub(job.submitted_at.elapsed());
            if remaining.is_zero() {
                return self.time_out(job);
            }

            // A status request that hangs is cut off at the deadline.
            let polled = match timeout(remaining, self.service.poll(&job.id)).await {
                Ok(polled) => polled,
                Err(_) => return self.time_out(job),
            };

            let outcome = match polled {
                Ok(status) => {
                    debug!("{:?} job {} status: {:?}", self.kind, job.id, status.state);
                    interpret(&job.id, status)
                }
                Err(e) => {
                    warn!("Polling {:?} job {} failed: {:#}", self.kind, job.id, e);
                    Some(JobOutcome::Failed)
                }
            };

            if let Some(outcome) = outcome {
                job.finish(&outcome);
                return outcome;
            }

            sleep(self.interval).await;
        }
    }

    fn time_out(&self, job: &mut GenerationJob) -> JobOutcome {
        warn!(
            "{:?} job {} timed out after {:?}",
            self.kind,
            job.id,
            job.submitted_at.elapsed()
        );
        job.finish(&JobOutcome::TimedOut);
        JobOutcome::TimedOut
    }

    pub async fn run(&self, request: &R) -> Result<(GenerationJob, JobOutcome)> {
        let mut job = self.submit(request).await?;
        let outcome = self.poll_until_terminal(&mut job).await;
        Ok((job, outcome))
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.service.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::ScriptedJobs;

    fn poller(service: Arc<ScriptedJobs<String>>, interval: u64, max_wait: u64) -> JobPoller<String> {
        JobPoller::new(
            service,
            JobKind::Image,
            Duration::from_secs(interval),
            Duration::from_secs(max_wait),
        )
    }

    #[test]
    fn test_remote_state_parse() {
        assert_eq!(RemoteState::parse("COMPLETE"), RemoteState::Complete);
        assert_eq!(RemoteState::parse("complete"), RemoteState::Complete);
        assert_eq!(RemoteState::parse("DELETED"), RemoteState::Deleted);
        assert_eq!(RemoteState::parse("PENDING"), RemoteState::Pending);
        assert_eq!(RemoteState::parse(""), RemoteState::Pending);
    }

    #[test]
    fn test_usable_url() {
        assert!(usable_url("https://cdn.example.com/a.jpg").is_some());
        assert!(usable_url(" http://cdn.example.com/a.jpg ").is_some());
        assert!(usable_url("").is_none());
        assert!(usable_url("a.jpg").is_none());
        assert!(usable_url("file:///tmp/a.jpg").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_terminal_times_out_within_one_interval() -> Result<()> {
        let service = Arc::new(ScriptedJobs::new(|_: &String, _| Ok(vec![RemoteStatus::pending()])));
        let poller = poller(service.clone(), 3, 10);

        let start = Instant::now();
        let (job, outcome) = poller.run(&"a lighthouse".to_string()).await?;
        let waited = start.elapsed();

        assert_eq!(outcome, JobOutcome::TimedOut);
        assert_eq!(job.status, JobStatus::TimedOut);
        assert!(waited >= Duration::from_secs(10), "returned early: {:?}", waited);
        assert!(waited <= Duration::from_secs(13), "overshot: {:?}", waited);
        // Polls at 0s, 3s, 6s, 9s.
        assert_eq!(service.poll_count(), 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stops_polling_immediately() -> Result<()> {
        let service = Arc::new(ScriptedJobs::new(|_: &String, _| {
            Ok(vec![RemoteStatus::pending(), RemoteStatus::failed()])
        }));
        let poller = poller(service.clone(), 5, 300);

        let (mut job, outcome) = poller.run(&"storm".to_string()).await?;
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(service.poll_count(), 2);

        // Terminal jobs are never polled again.
        assert_eq!(poller.poll_until_terminal(&mut job).await, JobOutcome::Failed);
        assert_eq!(service.poll_count(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_maps_to_failed() -> Result<()> {
        let service = Arc::new(ScriptedJobs::new(|_: &String, _| {
            Ok(vec![RemoteStatus {
                state: RemoteState::Deleted,
                result_url: Some("https://cdn.example.com/x.jpg".into()),
                asset_id: None,
            }])
        }));
        let (_, outcome) = poller(service, 5, 300).run(&"x".to_string()).await?;
        assert_eq!(outcome, JobOutcome::Failed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_without_url_is_failed() -> Result<()> {
        let service = Arc::new(ScriptedJobs::new(|_: &String, attempt| {
            let status = if attempt == 0 {
                RemoteStatus {
                    state: RemoteState::Complete,
                    result_url: None,
                    asset_id: Some("img-1".into()),
                }
            } else {
                RemoteStatus::complete("not a url", None)
            };
            Ok(vec![status])
        }));
        let poller = poller(service, 5, 300);

        let (job, outcome) = poller.run(&"first".to_string()).await?;
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(job.status, JobStatus::Failed);

        let (_, outcome) = poller.run(&"second".to_string()).await?;
        assert_eq!(outcome, JobOutcome::Failed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_after_pending() -> Result<()> {
        let service = Arc::new(ScriptedJobs::new(|_: &String, _| {
            Ok(vec![
                RemoteStatus::pending(),
                RemoteStatus::pending(),
                RemoteStatus::complete("https://cdn.example.com/gen/1.jpg", Some("asset-1")),
            ])
        }));
        let poller = poller(service.clone(), 5, 300);

        let start = Instant::now();
        let (job, outcome) = poller.run(&"keeper".to_string()).await?;

        assert_eq!(
            outcome,
            JobOutcome::Complete {
                url: "https://cdn.example.com/gen/1.jpg".into(),
                asset_id: Some("asset-1".into()),
            }
        );
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result_url.as_deref(), Some("https://cdn.example.com/gen/1.jpg"));
        assert_eq!(service.poll_count(), 3);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
        Ok(())
    }

    #[tokio::test]
    async fn test_submission_failure() {
        let service = Arc::new(ScriptedJobs::new(|_: &String, _| {
            Err(anyhow::anyhow!("HTTP 402 insufficient credits"))
        }));
        let err = poller(service.clone(), 5, 300)
            .run(&"x".to_string())
            .await
            .unwrap_err();

        assert!(matches!(
            StoryError::classify(&err),
            Some(StoryError::SubmissionFailed(_))
        ));
        assert_eq!(service.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_transport_error_is_failed() -> Result<()> {
        let service = Arc::new(ScriptedJobs::new(|_: &String, _| Ok(vec![])));
        // An empty plan makes the mock's poll return an error.
        let (_, outcome) = poller(service, 5, 300).run(&"x".to_string()).await?;
        assert_eq!(outcome, JobOutcome::Failed);
        Ok(())
    }

    struct StalledJobs {
        polls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl JobService<String> for StalledJobs {
        async fn submit(&self, _request: &String) -> Result<String> {
            Ok("job-stalled".into())
        }

        async fn poll(&self, _job_id: &str) -> Result<RemoteStatus> {
            self.polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::future::pending().await
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_status_request_times_out_at_max_wait() -> Result<()> {
        let service = Arc::new(StalledJobs {
            polls: std::sync::atomic::AtomicUsize::new(0),
        });
        let poller = JobPoller::new(
            service.clone(),
            JobKind::Motion,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        let start = Instant::now();
        let (job, outcome) = tokio::time::timeout(Duration::from_secs(3600), poller.run(&"clip".to_string()))
            .await
            .map_err(|_| anyhow::anyhow!("poller never gave up"))??;
        let waited = start.elapsed();

        assert_eq!(outcome, JobOutcome::TimedOut);
        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(job.outcome(), Some(JobOutcome::TimedOut));
        assert_eq!(service.polls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(waited >= Duration::from_secs(10), "returned early: {:?}", waited);
        assert!(waited <= Duration::from_secs(15), "overshot: {:?}", waited);
        Ok(())
    }
}
