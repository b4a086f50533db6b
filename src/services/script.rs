use crate::core::error::StoryError;
use crate::core::state::{Character, Keyframe, Role, VisualStyle};
use crate::services::llm::{complete_structured, complete_text, LlmClient, ResponseSchema, StructuredResponse};
use crate::services::prompts;
use anyhow::Result;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Deserialize)]
pub struct CharacterList {
    pub characters: Vec<Character>,
}

impl StructuredResponse for CharacterList {
    fn schema() -> ResponseSchema {
        let roles: Vec<&str> = Role::ALL.iter().map(Role::as_str).collect();
        ResponseSchema {
            name: "characters",
            schema: json!({
                "type": "object",
                "properties": {
                    "characters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": { "type": "string", "enum": roles },
                                "name": { "type": "string" },
                                "backstory": { "type": "string" },
                                "physicalDescription": { "type": "string" },
                                "personality": { "type": "string" }
                            },
                            "required": ["role", "name", "backstory", "physicalDescription", "personality"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["characters"],
                "additionalProperties": false
            }),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.characters.is_empty() {
            return Err("no characters".into());
        }
        let mut names = HashSet::new();
        for c in &self.characters {
            let name = c.name.trim();
            if name.is_empty() {
                return Err("character with empty name".into());
            }
            if !names.insert(name.to_lowercase()) {
                return Err(format!("duplicate character name {}", name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct KeyframeList {
    pub keyframes: Vec<Keyframe>,
}

impl StructuredResponse for KeyframeList {
    fn schema() -> ResponseSchema {
        ResponseSchema {
            name: "keyframes",
            schema: json!({
                "type": "object",
                "properties": {
                    "keyframes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": { "type": "string" },
                                "description": { "type": "string" },
                                "charactersInScene": {
                                    "type": "array",
                                    "items": { "type": "string" }
                                }
                            },
                            "required": ["title", "description", "charactersInScene"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["keyframes"],
                "additionalProperties": false
            }),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.keyframes.iter().position(|k| k.description.trim().is_empty()) {
            Some(i) => Err(format!("keyframe {} has no description", i + 1)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StyleChoice {
    pub style: VisualStyle,
}

impl StructuredResponse for StyleChoice {
    fn schema() -> ResponseSchema {
        let styles: Vec<&str> = VisualStyle::ALL.iter().map(VisualStyle::as_str).collect();
        ResponseSchema {
            name: "visual_style",
            schema: json!({
                "type": "object",
                "properties": {
                    "style": { "type": "string", "enum": styles }
                },
                "required": ["style"],
                "additionalProperties": false
            }),
        }
    }
}

pub async fn generate_script(llm: &dyn LlmClient, keywords: &[String], keyframe_count: usize) -> Result<String> {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(StoryError::Configuration("at least one keyword is required".into()).into());
    }

    let script = complete_text(llm, &prompts::script_prompt(&keywords, keyframe_count)).await?;
    info!("Generated script ({} chars)", script.len());
    Ok(script)
}

/// The cast of `script`. A narrator is always present in the result.
pub async fn extract_characters(llm: &dyn LlmClient, script: &str) -> Result<Vec<Character>> {
    let CharacterList { mut characters } =
        complete_structured::<CharacterList>(llm, &prompts::characters_prompt(script)).await?;

    for c in characters.iter_mut() {
        c.name = c.name.trim().to_string();
    }
    if !characters.iter().any(|c| c.role == Role::Narrator) {
        warn!("Cast has no narrator, adding one");
        characters.insert(
            0,
            Character {
                role: Role::Narrator,
                name: "Narrator".into(),
                backstory: "Tells the story.".into(),
                physical_description: "An unseen voice.".into(),
                personality: "Warm and steady".into(),
            },
        );
    }
    info!("Extracted {} characters", characters.len());
    Ok(characters)
}

pub async fn enhance_script(
    llm: &dyn LlmClient,
    script: &str,
    characters: &[Character],
    keyframe_count: usize,
) -> Result<String> {
    complete_text(llm, &prompts::enhance_prompt(script, characters, keyframe_count)).await
}

/// Exactly `keyframe_count` keyframes. Cast names are matched to the roster
/// case-insensitively; names outside the roster are dropped.
pub async fn extract_keyframes(
    llm: &dyn LlmClient,
    script: &str,
    keyframe_count: usize,
    characters: &[Character],
) -> Result<Vec<Keyframe>> {
    let roster: Vec<String> = characters.iter().map(|c| c.name.clone()).collect();
    let KeyframeList { mut keyframes } =
        complete_structured::<KeyframeList>(llm, &prompts::keyframes_prompt(script, keyframe_count, &roster)).await?;

    if keyframes.len() != keyframe_count {
        return Err(StoryError::SchemaViolation(format!(
            "expected {} keyframes, got {}",
            keyframe_count,
            keyframes.len()
        ))
        .into());
    }

    for keyframe in keyframes.iter_mut() {
        let mut known = BTreeSet::new();
        for name in &keyframe.characters_in_scene {
            match roster.iter().find(|r| r.eq_ignore_ascii_case(name.trim())) {
                Some(canonical) => {
                    known.insert(canonical.clone());
                }
                None => warn!("Keyframe '{}' names unknown character '{}'", keyframe.title, name),
            }
        }
        keyframe.characters_in_scene = known;
    }
    Ok(keyframes)
}

pub async fn determine_visual_style(llm: &dyn LlmClient, script: &str) -> Result<VisualStyle> {
    let StyleChoice { style } = complete_structured::<StyleChoice>(llm, &prompts::visual_style_prompt(script)).await?;
    info!("Visual style: {}", style);
    Ok(style)
}
