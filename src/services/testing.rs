//! Hand-written fakes for the remote seams, shared by the service tests.

use crate::core::error::StoryError;
use crate::services::jobs::{JobService, RemoteStatus};
use crate::services::llm::{LlmClient, ResponseSchema};
use crate::services::render::{RenderRequest, StillRenderer};
use crate::services::tts::TtsClient;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type LlmHandler = dyn Fn(&str, Option<&ResponseSchema>) -> Result<String> + Send + Sync;

/// Completion client answering from a closure and recording every prompt.
pub struct ScriptedLlm {
    handler: Box<LlmHandler>,
    calls: Mutex<Vec<(Option<&'static str>, String)>>,
}

impl ScriptedLlm {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, Option<&ResponseSchema>) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A well-behaved model telling the lighthouse story in `keyframe_count` moments.
    pub fn story(keyframe_count: usize) -> Self {
        Self::new(move |prompt, schema| story_response(prompt, schema, keyframe_count))
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made with the named schema, or plain-text calls for `None`.
    pub fn calls_for(&self, schema: Option<&str>) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| *name == schema)
            .count()
    }

    pub fn prompts_for(&self, schema: Option<&str>) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| *name == schema)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

impl fmt::Debug for ScriptedLlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedLlm").field("calls", &self.calls()).finish()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, schema: Option<&ResponseSchema>) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((schema.map(|s| s.name), prompt.to_string()));
        (self.handler)(prompt, schema)
    }
}

pub const STORY_SCRIPT: &str = "FADE IN: A lighthouse on a black rock. The storm arrives.";
pub const STORY_ENHANCED: &str =
    "FADE IN: Mara climbs the lighthouse stair while the storm batters the glass.";
pub const NARRATION_LINE: &str = "The storm rolled in as the old lighthouse kept its lonely watch.";
pub const DIALOG_LINE: &str = "I will keep this lamp burning until every ship is home.";

/// Title of the storyboard moment a scene prompt was built from.
pub fn moment_title(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Moment: "))
        .unwrap_or("unknown")
        .to_string()
}

/// Canned answers keyed by schema name.
pub fn story_response(prompt: &str, schema: Option<&ResponseSchema>, keyframe_count: usize) -> Result<String> {
    let Some(schema) = schema else {
        if prompt.starts_with("Revise the screenplay") {
            return Ok(STORY_ENHANCED.to_string());
        }
        return Ok(STORY_SCRIPT.to_string());
    };

    let body = match schema.name {
        "characters" => json!({
            "characters": [
                {
                    "role": "narrator",
                    "name": "Narrator",
                    "backstory": "Has watched the coast for a century.",
                    "physicalDescription": "A calm voice, never seen.",
                    "personality": "Patient"
                },
                {
                    "role": "hero",
                    "name": "Mara",
                    "backstory": "Keeper of the lighthouse.",
                    "physicalDescription": "Oilskin coat, grey braid, lantern in hand.",
                    "personality": "Stubborn and kind"
                },
                {
                    "role": "sidekick",
                    "name": "Gull",
                    "backstory": "A gull that nests under the lamp room.",
                    "physicalDescription": "White gull with a bent wing.",
                    "personality": "Nosy"
                }
            ]
        }),
        "keyframes" => {
            let keyframes: Vec<_> = (1..=keyframe_count)
                .map(|i| {
                    let cast = if i % 2 == 1 { vec!["Mara"] } else { vec!["Mara", "Gull"] };
                    json!({
                        "title": format!("Moment {}", i),
                        "description": format!("Storm scene number {}", i),
                        "charactersInScene": cast
                    })
                })
                .collect();
            json!({ "keyframes": keyframes })
        }
        "visual_style" => json!({ "style": "WATERCOLOR" }),
        "scenes" => {
            let title = moment_title(prompt);
            json!({
                "narratedScene": {
                    "character": "Narrator",
                    "dialogText": NARRATION_LINE,
                    "imagePrompt": format!("{} wide shot of the lighthouse", title)
                },
                "dialoguedScene": {
                    "character": "Mara",
                    "dialogText": DIALOG_LINE,
                    "imagePrompt": format!("{} close up of Mara", title)
                }
            })
        }
        other => return Err(anyhow!("no canned response for schema {}", other)),
    };
    Ok(body.to_string())
}

type JobPlan<R> = dyn Fn(&R, usize) -> Result<Vec<RemoteStatus>> + Send + Sync;

/// Job service whose jobs replay a status script chosen at submit time.
///
/// The plan receives the request and the submit attempt number (0-based);
/// `Err` rejects the submission. Each poll consumes the next status and the
/// last one repeats. An empty script makes every poll a transport error.
pub struct ScriptedJobs<R> {
    plan: Box<JobPlan<R>>,
    jobs: Mutex<HashMap<String, VecDeque<RemoteStatus>>>,
    requests: Mutex<Vec<R>>,
    polls: AtomicUsize,
    fetches: AtomicUsize,
}

impl<R: Clone> ScriptedJobs<R> {
    pub fn new<F>(plan: F) -> Self
    where
        F: Fn(&R, usize) -> Result<Vec<RemoteStatus>> + Send + Sync + 'static,
    {
        Self {
            plan: Box::new(plan),
            jobs: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> Vec<R> {
        self.requests.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> JobService<R> for ScriptedJobs<R> {
    async fn submit(&self, request: &R) -> Result<String> {
        let attempt = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let script = (self.plan)(request, attempt)?;
        let id = format!("job-{}", attempt);
        self.jobs.lock().unwrap().insert(id.clone(), script.into());
        Ok(id)
    }

    async fn poll(&self, job_id: &str) -> Result<RemoteStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let script = jobs
            .get_mut(job_id)
            .ok_or_else(|| anyhow!("unknown job {}", job_id))?;
        match script.len() {
            0 => Err(StoryError::RemoteUnavailable("connection reset".into()).into()),
            1 => Ok(script[0].clone()),
            _ => Ok(script.pop_front().unwrap()),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if url.contains("broken") {
            return Err(StoryError::RemoteUnavailable(format!("404 for {}", url)).into());
        }
        Ok(format!("bytes of {}", url).into_bytes())
    }
}

/// Renderer that counts invocations and writes a placeholder clip.
pub struct CountingRenderer {
    fail: bool,
    requests: Mutex<Vec<RenderRequest>>,
}

impl CountingRenderer {
    pub fn new() -> Self {
        Self {
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StillRenderer for CountingRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(StoryError::EncodeFailed("encoder exited with status 1".into()).into());
        }
        tokio::fs::write(&request.output_video, b"still clip").await?;
        Ok(())
    }
}

/// Speech client returning placeholder audio and recording `(text, voice)`.
pub struct RecordingTts {
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingTts {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsClient for RecordingTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));
        if self.fail {
            return Err(StoryError::RemoteUnavailable("tts quota exceeded".into()).into());
        }
        Ok(b"ID3 placeholder".to_vec())
    }
}
