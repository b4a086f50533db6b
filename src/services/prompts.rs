use crate::core::state::{Character, Keyframe, Role, VisualStyle};
use std::collections::BTreeSet;

/// Approximate story length per keyframe, used to size the script.
pub const WORDS_PER_KEYFRAME: usize = 125;

/// Appended to an image prompt when the previous attempt failed.
pub const QUALITY_SUFFIX: &str =
    ", highly detailed, sharp focus, professional lighting, coherent composition";

pub const MIN_DIALOG_WORDS: usize = 10;
pub const MAX_DIALOG_WORDS: usize = 15;

pub fn script_prompt(keywords: &[String], keyframe_count: usize) -> String {
    format!(
        r#"You are a screenwriter. Write a short, self-contained screenplay.
Theme keywords: {keywords}.

Requirements:
- About {words} words, told in {count} key scenes.
- One clear story arc with a beginning, a turning point and an ending.
- Only the characters the story needs, each with a vivid visual presence.
- Mix narration and spoken lines; favour concrete images over abstractions.

Use plain scene headings. Return only the screenplay."#,
        keywords = keywords.join(", "),
        words = keyframe_count * WORDS_PER_KEYFRAME,
        count = keyframe_count,
    )
}

pub fn characters_prompt(script: &str) -> String {
    let roles: Vec<&str> = Role::ALL.iter().map(Role::as_str).collect();
    format!(
        r#"You are a casting director. List every character in the screenplay below.
Always include exactly one narrator. Give each character one role from: {roles}.
For each character provide a name, a short backstory, a physical description
detailed enough to draw, and a personality summary.

Screenplay:
{script}"#,
        roles = roles.join(", "),
    )
}

fn roster_lines(characters: &[Character]) -> String {
    characters
        .iter()
        .map(|c| {
            format!(
                "- {} ({}): {} Looks: {}",
                c.name,
                c.role.as_str(),
                c.personality,
                c.physical_description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn enhance_prompt(script: &str, characters: &[Character], keyframe_count: usize) -> String {
    format!(
        r#"Revise the screenplay below so it can be told in exactly {count} visual moments.
Keep the plot. Tighten pacing, sharpen each moment's setting and action, and make
sure every named character matches the cast list.

Cast:
{cast}

Screenplay:
{script}

Return only the revised screenplay."#,
        count = keyframe_count,
        cast = roster_lines(characters),
    )
}

pub fn keyframes_prompt(script: &str, keyframe_count: usize, roster: &[String]) -> String {
    format!(
        r#"You are a storyboard artist. Break the screenplay into exactly {count} keyframes
that follow the story from opening to resolution.

For each keyframe give:
- title: a short name for the moment
- description: setting, time of day, action, mood, colours and lighting, written
  so an illustrator could paint it
- charactersInScene: names of the characters present, chosen only from: {names}

Screenplay:
{script}

Return exactly {count} keyframes."#,
        count = keyframe_count,
        names = roster.join(", "),
    )
}

pub fn visual_style_prompt(script: &str) -> String {
    let styles: Vec<&str> = VisualStyle::ALL.iter().map(VisualStyle::as_str).collect();
    format!(
        r#"You are an art director. Pick the one visual style that best suits the genre,
setting and tone of this screenplay. Choose from: {styles}.

Screenplay:
{script}"#,
        styles = styles.join(", "),
    )
}

pub fn scene_prompt(keyframe: &Keyframe, characters: &[Character], seen: &BTreeSet<String>) -> String {
    let present: Vec<&str> = keyframe.characters_in_scene.iter().map(String::as_str).collect();
    let seen: Vec<&str> = seen.iter().map(String::as_str).collect();
    format!(
        r#"Turn this storyboard moment into two short scenes.

Moment: {title}
{description}
Characters present: {present}
Already introduced: {seen}

Cast:
{cast}

narratedScene: the narrator sets the scene and introduces any present character
not already introduced. character must be the narrator.
dialoguedScene: one present character speaks the central action in their own voice.
character must be that speaker's name.

Every dialogText is between {min} and {max} words. Every imagePrompt describes
the frame visually, with no text or captions."#,
        title = keyframe.title,
        description = keyframe.description,
        present = if present.is_empty() { "none".to_string() } else { present.join(", ") },
        seen = if seen.is_empty() { "nobody yet".to_string() } else { seen.join(", ") },
        cast = roster_lines(characters),
        min = MIN_DIALOG_WORDS,
        max = MAX_DIALOG_WORDS,
    )
}

/// Feedback appended when a scene response broke the word-count rule.
pub fn scene_retry_note(problem: &str) -> String {
    format!(
        "\n\nYour previous answer was rejected: {}. Keep every dialogText between {} and {} words.",
        problem, MIN_DIALOG_WORDS, MAX_DIALOG_WORDS
    )
}
