pub mod jobs;
pub mod leonardo;
pub mod llm;
pub mod media;
pub mod prompts;
pub mod render;
pub mod scenes;
pub mod script;
pub mod tts;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
