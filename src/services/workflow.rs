use crate::core::checkpoint::{load_stage, save_stage, RunStateStore, Stage};
use crate::core::config::Config;
use crate::core::error::StoryError;
use crate::core::io::{write_json, Storage};
use crate::core::state::{
    Character, Keyframe, KeyframeResult, MediaRef, RunResult, Scene, ScriptPair, SeenCharacters, VisualStyle,
};
use crate::services::llm::LlmClient;
use crate::services::media::MediaGenerator;
use crate::services::scenes::SceneSynthesizer;
use crate::services::script;
use crate::services::tts::{voice_for_role, TtsClient};
use anyhow::{Context, Result};
use futures_util::future::{join_all, try_join_all};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

type ScenePair = [Scene; 2];

#[derive(Debug, Serialize, Deserialize)]
struct SceneStage {
    scenes: Vec<ScenePair>,
    seen_characters: BTreeSet<String>,
}

/// What a run was asked to produce. Stored under the run id so a resume
/// only restores stages that were computed for the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RunInputs {
    keywords: Vec<String>,
    keyframe_count: usize,
    output_dir: PathBuf,
    generate_images: bool,
    generate_voiceover: bool,
    generate_motion: bool,
    extract_characters: bool,
    save_script: bool,
}

impl RunInputs {
    fn new(keywords: &[String], config: &Config) -> Self {
        let run = &config.run;
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            keyframe_count: run.keyframe_count,
            output_dir: run.output_dir.clone(),
            generate_images: run.generate_images,
            generate_voiceover: run.generate_voiceover,
            generate_motion: run.generate_motion,
            extract_characters: run.extract_characters,
            save_script: run.save_script,
        }
    }

    /// Stages 1-5 depend only on the story request.
    fn same_story(&self, other: &Self) -> bool {
        self.keywords == other.keywords && self.keyframe_count == other.keyframe_count
    }

    fn same_images(&self, other: &Self) -> bool {
        self.same_story(other) && self.output_dir == other.output_dir && self.generate_images == other.generate_images
    }

    fn same_media(&self, other: &Self) -> bool {
        self.same_images(other)
            && self.generate_voiceover == other.generate_voiceover
            && self.generate_motion == other.generate_motion
    }
}

/// Which of the later checkpoints a resumed run may reuse.
#[derive(Debug, Clone, Copy)]
struct Resume {
    images: bool,
    media: bool,
    result: bool,
}

/// Runs the whole story pipeline for one set of keywords.
pub struct StoryWorkflow {
    config: Config,
    llm: Arc<dyn LlmClient>,
    media: Option<Arc<MediaGenerator>>,
    tts: Option<Arc<dyn TtsClient>>,
    storage: Arc<dyn Storage>,
    checkpoints: Arc<dyn RunStateStore>,
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

impl StoryWorkflow {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        storage: Arc<dyn Storage>,
        checkpoints: Arc<dyn RunStateStore>,
    ) -> Self {
        Self {
            config,
            llm,
            media: None,
            tts: None,
            storage,
            checkpoints,
        }
    }

    pub fn with_media(mut self, media: MediaGenerator) -> Self {
        self.media = Some(Arc::new(media));
        self
    }

    pub fn with_tts(mut self, tts: Arc<dyn TtsClient>) -> Self {
        self.tts = Some(tts);
        self
    }

    fn output_path(&self, name: String) -> PathBuf {
        self.config.run.output_dir.join(name)
    }

    /// Restores `stage` from the run's checkpoint when `restore` is set, or
    /// awaits `work` and records its result.
    async fn checkpointed<T, F>(&self, run_id: &str, stage: Stage, restore: bool, work: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T>>,
    {
        if restore {
            if let Some(value) = load_stage(self.checkpoints.as_ref(), run_id, stage).await? {
                info!("Stage '{}' restored from checkpoint", stage);
                return Ok(value);
            }
        }

        info!("Stage '{}' started", stage);
        let start = Instant::now();
        let value = work.await.with_context(|| format!("stage '{}' failed", stage))?;
        save_stage(self.checkpoints.as_ref(), run_id, stage, &value).await?;
        info!("Stage '{}' completed in {:.2}s", stage, start.elapsed().as_secs_f64());
        Ok(value)
    }

    /// Compares `inputs` with what the run id was last used for. A different
    /// story discards the old checkpoints; changed output settings only
    /// invalidate the stages that depend on them.
    async fn prepare_resume(&self, run_id: &str, inputs: &RunInputs) -> Result<Resume> {
        let store = self.checkpoints.as_ref();
        let previous: Option<RunInputs> = load_stage(store, run_id, Stage::Inputs).await?;

        let resume = match previous {
            Some(previous) if previous.same_story(inputs) => {
                let resume = Resume {
                    images: previous.same_images(inputs),
                    media: previous.same_media(inputs),
                    result: previous == *inputs,
                };
                if !resume.result {
                    info!("Run '{}' resumed with changed output settings", run_id);
                }
                resume
            }
            previous => {
                if previous.is_some() {
                    warn!(
                        "Run '{}' was started for a different story, discarding its checkpoints",
                        run_id
                    );
                }
                store.clear(run_id).await?;
                Resume {
                    images: false,
                    media: false,
                    result: false,
                }
            }
        };

        save_stage(store, run_id, Stage::Inputs, inputs).await?;
        Ok(resume)
    }

    fn check_inputs(&self, keywords: &[String]) -> Result<()> {
        if keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(StoryError::Configuration("at least one keyword is required".into()).into());
        }
        let run = &self.config.run;
        if run.keyframe_count == 0 {
            return Err(StoryError::Configuration("keyframe_count must be at least 1".into()).into());
        }
        if (run.generate_images || run.generate_motion) && self.media.is_none() {
            return Err(StoryError::Configuration("image generation enabled without an image service".into()).into());
        }
        if run.generate_voiceover && self.tts.is_none() {
            return Err(StoryError::Configuration("voiceover enabled without a TTS client".into()).into());
        }
        Ok(())
    }

    pub async fn run(&self, run_id: &str, keywords: &[String]) -> Result<RunResult> {
        self.check_inputs(keywords)?;
        let run = &self.config.run;
        let count = run.keyframe_count;
        let llm = self.llm.as_ref();
        info!("Run '{}': {} keyframes from [{}]", run_id, count, keywords.join(", "));
        let resume = self.prepare_resume(run_id, &RunInputs::new(keywords, &self.config)).await?;

        let script: String = self
            .checkpointed(run_id, Stage::Script, true, script::generate_script(llm, keywords, count))
            .await?;

        let characters: Vec<Character> = self
            .checkpointed(run_id, Stage::Characters, true, script::extract_characters(llm, &script))
            .await?;

        let enhanced: String = self
            .checkpointed(
                run_id,
                Stage::EnhancedScript,
                true,
                script::enhance_script(llm, &script, &characters, count),
            )
            .await?;

        let (keyframes, style): (Vec<Keyframe>, VisualStyle) = self
            .checkpointed(run_id, Stage::KeyframesAndStyle, true, async {
                futures_util::try_join!(
                    script::extract_keyframes(llm, &enhanced, count, &characters),
                    script::determine_visual_style(llm, &enhanced),
                )
            })
            .await?;

        let SceneStage {
            mut scenes,
            seen_characters,
        } = self
            .checkpointed(run_id, Stage::Scenes, true, self.synthesize_scenes(&keyframes, &characters))
            .await?;

        if run.generate_images {
            scenes = self
                .checkpointed(run_id, Stage::Images, resume.images, self.generate_images(scenes, style))
                .await?;
        }

        if run.generate_voiceover || run.generate_motion {
            scenes = self
                .checkpointed(run_id, Stage::Media, resume.media, self.generate_media(scenes))
                .await?;
        }

        let result = RunResult {
            keyframes: keyframes
                .iter()
                .zip(scenes)
                .map(|(keyframe, scenes)| KeyframeResult {
                    description: keyframe.description.clone(),
                    scenes,
                    visual_style: style,
                })
                .collect(),
            characters: run.extract_characters.then(|| characters.clone()),
            scripts: run.save_script.then(|| ScriptPair {
                original: script.clone(),
                enhanced: enhanced.clone(),
            }),
            seen_characters,
        };

        self.checkpointed(run_id, Stage::Result, resume.result, async {
            self.write_artifacts(&result, &keyframes).await?;
            Ok(result)
        })
        .await
    }

    async fn synthesize_scenes(&self, keyframes: &[Keyframe], characters: &[Character]) -> Result<SceneStage> {
        let synthesizer = SceneSynthesizer::new(self.llm.clone(), self.config.llm.retry_count);
        let seen = SeenCharacters::new();
        let pb = progress_bar(keyframes.len())?;

        let scenes = try_join_all(keyframes.iter().map(|keyframe| {
            let pb = pb.clone();
            let synthesizer = &synthesizer;
            let seen = &seen;
            async move {
                let pair = synthesizer.synthesize(keyframe, characters, seen).await?;
                pb.inc(1);
                Ok::<_, anyhow::Error>(pair)
            }
        }))
        .await?;
        pb.finish_with_message("Scenes complete");

        Ok(SceneStage {
            scenes,
            seen_characters: seen.snapshot(),
        })
    }

    async fn generate_images(&self, scenes: Vec<ScenePair>, style: VisualStyle) -> Result<Vec<ScenePair>> {
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| StoryError::Configuration("image service missing".into()))?;
        let pb = progress_bar(scenes.len() * 2)?;

        let scenes = join_all(scenes.into_iter().enumerate().map(|(i, pair)| {
            let pb = pb.clone();
            async move {
                let [first, second] = pair;
                let fill = |j: usize, mut scene: Scene| {
                    let pb = pb.clone();
                    async move {
                        let prompt = scene.image_prompt.clone().unwrap_or_else(|| scene.description.clone());
                        let path = self.output_path(format!("keyframe_{}_{}.jpg", i + 1, j));
                        scene.image_ref = media.generate_image(&prompt, style, &path).await;
                        pb.inc(1);
                        scene
                    }
                };
                let (first, second) = futures_util::join!(fill(1, first), fill(2, second));
                [first, second]
            }
        }))
        .await;
        pb.finish_with_message("Images complete");

        let missing = scenes
            .iter()
            .flatten()
            .filter(|s| s.image_ref.is_none())
            .count();
        if missing > 0 {
            warn!("{} scene image(s) could not be generated", missing);
        }
        Ok(scenes)
    }

    async fn generate_media(&self, scenes: Vec<ScenePair>) -> Result<Vec<ScenePair>> {
        let pb = progress_bar(scenes.len() * 2)?;

        let scenes = join_all(scenes.into_iter().enumerate().map(|(i, pair)| {
            let pb = pb.clone();
            async move {
                let [first, second] = pair;
                let (first, second) = futures_util::join!(
                    self.scene_media(i + 1, 1, first),
                    self.scene_media(i + 1, 2, second),
                );
                pb.inc(2);
                [first, second]
            }
        }))
        .await;
        pb.finish_with_message("Media complete");
        Ok(scenes)
    }

    /// Voiceover and clip for one scene. Failures only clear that field.
    async fn scene_media(&self, i: usize, j: usize, mut scene: Scene) -> Scene {
        let voiceover = async {
            let tts = match (&self.tts, self.config.run.generate_voiceover) {
                (Some(tts), true) => tts,
                _ => return None,
            };
            let path = self.output_path(format!("voiceover_{}_{}.mp3", i, j));
            let voice = voice_for_role(scene.character.role);
            let spoken = async {
                let audio = tts.synthesize(&scene.dialog_text, voice).await?;
                self.storage.write(&path, &audio).await?;
                Ok::<_, anyhow::Error>(MediaRef::local(path.clone()))
            };
            match spoken.await {
                Ok(media) => Some(media),
                Err(e) => {
                    warn!("Voiceover {} failed: {:#}", path.display(), e);
                    None
                }
            }
        };

        let clip = async {
            let media = match (&self.media, self.config.run.generate_motion) {
                (Some(media), true) => media,
                _ => return None,
            };
            let Some(image) = scene.image_ref.as_ref() else {
                debug!("Scene {}_{} has no image, skipping motion", i, j);
                return None;
            };
            let path = self.output_path(format!("keyframe_{}_{}.mp4", i, j));
            match media.generate_motion(image, &path).await {
                Ok(media) => Some(media),
                Err(e) => {
                    warn!("Clip {} failed: {:#}", path.display(), e);
                    None
                }
            }
        };

        let (audio_ref, video_ref) = futures_util::join!(voiceover, clip);
        scene.audio_ref = audio_ref;
        scene.video_ref = video_ref;
        scene
    }

    async fn write_artifacts(&self, result: &RunResult, keyframes: &[Keyframe]) -> Result<()> {
        let storage = self.storage.as_ref();
        let style = result
            .keyframes
            .first()
            .map(|k| k.visual_style.as_str())
            .unwrap_or(VisualStyle::None.as_str());
        write_json(storage, &self.output_path("metadata.json".into()), &json!({ "visual_style": style })).await?;

        if let Some(characters) = &result.characters {
            write_json(storage, &self.output_path("characters.json".into()), characters).await?;
        }

        if let Some(scripts) = &result.scripts {
            let content = format!(
                "ORIGINAL SCRIPT\n\n{}\n\nENHANCED SCRIPT\n\n{}\n",
                scripts.original, scripts.enhanced
            );
            storage
                .write(&self.output_path("script.txt".into()), content.as_bytes())
                .await?;
        }

        for (i, (keyframe, entry)) in keyframes.iter().zip(&result.keyframes).enumerate() {
            let i = i + 1;
            let content = format!("Title: {}\n\n{}\n", keyframe.title, keyframe.description);
            storage
                .write(&self.output_path(format!("keyframe_{}.txt", i)), content.as_bytes())
                .await?;

            for (j, scene) in entry.scenes.iter().enumerate() {
                let j = j + 1;
                let content = format!(
                    "Title: {}\n\nDescription: {}\n\nImage prompt: {}\n",
                    scene.title,
                    scene.description,
                    scene.image_prompt.as_deref().unwrap_or("-")
                );
                storage
                    .write(&self.output_path(format!("scene_{}_{}.txt", i, j)), content.as_bytes())
                    .await?;

                let dialog = json!({
                    "character": scene.character.name,
                    "role": scene.character.role,
                    "dialog": scene.dialog_text,
                });
                write_json(storage, &self.output_path(format!("dialog_{}_{}.json", i, j)), &dialog).await?;
            }
        }

        info!("Wrote artifacts to {}", self.config.run.output_dir.display());
        Ok(())
    }
}
