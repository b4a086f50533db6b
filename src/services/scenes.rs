use crate::core::error::StoryError;
use crate::core::state::{Character, Keyframe, Role, Scene, SeenCharacters};
use crate::services::llm::{complete_structured, LlmClient, ResponseSchema, StructuredResponse};
use crate::services::prompts::{self, MAX_DIALOG_WORDS, MIN_DIALOG_WORDS};
use crate::utils::text::word_count;
use anyhow::Result;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDraft {
    pub character: String,
    pub dialog_text: String,
    pub image_prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneResponse {
    pub narrated_scene: SceneDraft,
    pub dialogued_scene: SceneDraft,
}

fn check_dialog(label: &str, text: &str) -> std::result::Result<(), String> {
    let words = word_count(text);
    if !(MIN_DIALOG_WORDS..=MAX_DIALOG_WORDS).contains(&words) {
        return Err(format!(
            "{} dialogText has {} words, expected {}-{}",
            label, words, MIN_DIALOG_WORDS, MAX_DIALOG_WORDS
        ));
    }
    Ok(())
}

impl StructuredResponse for SceneResponse {
    fn schema() -> ResponseSchema {
        let draft = json!({
            "type": "object",
            "properties": {
                "character": { "type": "string" },
                "dialogText": { "type": "string" },
                "imagePrompt": { "type": "string" }
            },
            "required": ["character", "dialogText", "imagePrompt"],
            "additionalProperties": false
        });
        ResponseSchema {
            name: "scenes",
            schema: json!({
                "type": "object",
                "properties": {
                    "narratedScene": draft.clone(),
                    "dialoguedScene": draft
                },
                "required": ["narratedScene", "dialoguedScene"],
                "additionalProperties": false
            }),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        check_dialog("narratedScene", &self.narrated_scene.dialog_text)?;
        check_dialog("dialoguedScene", &self.dialogued_scene.dialog_text)
    }
}

fn find_character<'a>(characters: &'a [Character], name: &str) -> Option<&'a Character> {
    characters
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
}

/// Turns one keyframe into its narration and dialog scenes.
pub struct SceneSynthesizer {
    llm: Arc<dyn LlmClient>,
    retry_count: usize,
}

impl SceneSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, retry_count: usize) -> Self {
        Self { llm, retry_count }
    }

    /// Responses that break the dialog rules are re-requested up to
    /// `retry_count` more times. The keyframe's cast and the dialog speaker
    /// join `seen` once both scenes are accepted; the narrator never does.
    pub async fn synthesize(
        &self,
        keyframe: &Keyframe,
        characters: &[Character],
        seen: &SeenCharacters,
    ) -> Result<[Scene; 2]> {
        let base_prompt = prompts::scene_prompt(keyframe, characters, &seen.snapshot());
        let mut prompt = base_prompt.clone();
        let mut attempt = 0;

        let scenes = loop {
            let result = match complete_structured::<SceneResponse>(self.llm.as_ref(), &prompt).await {
                Ok(response) => self.accept(keyframe, characters, response),
                Err(e) => Err(e),
            };

            match result {
                Ok(scenes) => break scenes,
                Err(e) if StoryError::is_schema_violation(&e) && attempt < self.retry_count => {
                    attempt += 1;
                    warn!(
                        "Scenes for '{}' rejected (retry {}/{}): {:#}",
                        keyframe.title, attempt, self.retry_count, e
                    );
                    prompt = format!("{}{}", base_prompt, prompts::scene_retry_note(&format!("{:#}", e)));
                }
                Err(e) => return Err(e),
            }
        };

        let speaker = &scenes[1].character.name;
        let added = seen.insert_all(keyframe.characters_in_scene.iter().chain(std::iter::once(speaker)));
        debug!("Scenes for '{}' accepted, {} new characters seen", keyframe.title, added);
        Ok(scenes)
    }

    fn accept(&self, keyframe: &Keyframe, characters: &[Character], response: SceneResponse) -> Result<[Scene; 2]> {
        let narrator = find_character(characters, &response.narrated_scene.character)
            .or_else(|| characters.iter().find(|c| c.role == Role::Narrator))
            .ok_or_else(|| {
                StoryError::SchemaViolation(format!(
                    "narrated scene speaker '{}' is not in the cast",
                    response.narrated_scene.character
                ))
            })?;
        let speaker = find_character(characters, &response.dialogued_scene.character).ok_or_else(|| {
            StoryError::SchemaViolation(format!(
                "dialog speaker '{}' is not in the cast",
                response.dialogued_scene.character
            ))
        })?;

        let build = |character: &Character, draft: SceneDraft| {
            let image_prompt = Some(draft.image_prompt.trim().to_string()).filter(|p| !p.is_empty());
            Scene::from_keyframe(keyframe, character.clone(), draft.dialog_text.trim().to_string(), image_prompt)
        };
        Ok([
            build(narrator, response.narrated_scene),
            build(speaker, response.dialogued_scene),
        ])
    }
}
