use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Narrator,
    Child,
    Elder,
    #[serde(alias = "fairy")]
    Fae,
    Hero,
    Villain,
    Sage,
    Sidekick,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Narrator,
        Role::Child,
        Role::Elder,
        Role::Fae,
        Role::Hero,
        Role::Villain,
        Role::Sage,
        Role::Sidekick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Narrator => "narrator",
            Role::Child => "child",
            Role::Elder => "elder",
            Role::Fae => "fae",
            Role::Hero => "hero",
            Role::Villain => "villain",
            Role::Sage => "sage",
            Role::Sidekick => "sidekick",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub role: Role,
    pub name: String,
    pub backstory: String,
    pub physical_description: String,
    pub personality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub characters_in_scene: BTreeSet<String>,
}

/// Where a generated artifact came from and where it was stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Remote id of the produced asset; motion jobs are submitted against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl MediaRef {
    pub fn local(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub title: String,
    pub description: String,
    pub characters_in_scene: BTreeSet<String>,
    pub character: Character,
    pub dialog_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub image_ref: Option<MediaRef>,
    #[serde(default)]
    pub audio_ref: Option<MediaRef>,
    #[serde(default)]
    pub video_ref: Option<MediaRef>,
}

impl Scene {
    pub fn from_keyframe(
        keyframe: &Keyframe,
        character: Character,
        dialog_text: String,
        image_prompt: Option<String>,
    ) -> Self {
        Self {
            title: keyframe.title.clone(),
            description: keyframe.description.clone(),
            characters_in_scene: keyframe.characters_in_scene.clone(),
            character,
            dialog_text,
            image_prompt,
            image_ref: None,
            audio_ref: None,
            video_ref: None,
        }
    }
}

/// Style presets understood by the image service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisualStyle {
    #[serde(rename = "RENDER_3D")]
    Render3D,
    #[serde(rename = "ACRYLIC")]
    Acrylic,
    #[serde(rename = "ANIME_GENERAL")]
    AnimeGeneral,
    #[serde(rename = "CREATIVE")]
    Creative,
    #[serde(rename = "DYNAMIC")]
    Dynamic,
    #[serde(rename = "FASHION")]
    Fashion,
    #[serde(rename = "GAME_CONCEPT")]
    GameConcept,
    #[serde(rename = "GRAPHIC_DESIGN_3D")]
    GraphicDesign3D,
    #[serde(rename = "ILLUSTRATION")]
    Illustration,
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "PORTRAIT")]
    Portrait,
    #[serde(rename = "PORTRAIT_CINEMATIC")]
    PortraitCinematic,
    #[serde(rename = "RAY_TRACED")]
    RayTraced,
    #[serde(rename = "STOCK_PHOTO")]
    StockPhoto,
    #[serde(rename = "WATERCOLOR")]
    Watercolor,
}

impl VisualStyle {
    pub const ALL: [VisualStyle; 15] = [
        VisualStyle::Render3D,
        VisualStyle::Acrylic,
        VisualStyle::AnimeGeneral,
        VisualStyle::Creative,
        VisualStyle::Dynamic,
        VisualStyle::Fashion,
        VisualStyle::GameConcept,
        VisualStyle::GraphicDesign3D,
        VisualStyle::Illustration,
        VisualStyle::None,
        VisualStyle::Portrait,
        VisualStyle::PortraitCinematic,
        VisualStyle::RayTraced,
        VisualStyle::StockPhoto,
        VisualStyle::Watercolor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VisualStyle::Render3D => "RENDER_3D",
            VisualStyle::Acrylic => "ACRYLIC",
            VisualStyle::AnimeGeneral => "ANIME_GENERAL",
            VisualStyle::Creative => "CREATIVE",
            VisualStyle::Dynamic => "DYNAMIC",
            VisualStyle::Fashion => "FASHION",
            VisualStyle::GameConcept => "GAME_CONCEPT",
            VisualStyle::GraphicDesign3D => "GRAPHIC_DESIGN_3D",
            VisualStyle::Illustration => "ILLUSTRATION",
            VisualStyle::None => "NONE",
            VisualStyle::Portrait => "PORTRAIT",
            VisualStyle::PortraitCinematic => "PORTRAIT_CINEMATIC",
            VisualStyle::RayTraced => "RAY_TRACED",
            VisualStyle::StockPhoto => "STOCK_PHOTO",
            VisualStyle::Watercolor => "WATERCOLOR",
        }
    }
}

impl fmt::Display for VisualStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeResult {
    pub description: String,
    /// Narration scene first, dialog scene second.
    pub scenes: [Scene; 2],
    pub visual_style: VisualStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPair {
    pub original: String,
    pub enhanced: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub keyframes: Vec<KeyframeResult>,
    #[serde(default)]
    pub characters: Option<Vec<Character>>,
    #[serde(default)]
    pub scripts: Option<ScriptPair>,
    #[serde(default)]
    pub seen_characters: BTreeSet<String>,
}

impl RunResult {
    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.keyframes.iter().flat_map(|k| k.scenes.iter())
    }
}

/// Names of characters that have appeared so far in a run.
///
/// Shared by every concurrent scene-synthesis task. Inserts are an idempotent
/// set union, so the final contents do not depend on completion order; reads
/// taken mid-run only see whatever writers have finished.
#[derive(Debug, Default)]
pub struct SeenCharacters {
    names: Mutex<BTreeSet<String>>,
}

impl SeenCharacters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many names were not present before.
    pub fn insert_all<'a, I>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut guard = self.names.lock().unwrap_or_else(|e| e.into_inner());
        names
            .into_iter()
            .filter(|name| guard.insert((*name).clone()))
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
