use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use storyreel::core::checkpoint::StorageRunStore;
use storyreel::core::config::Config;
use storyreel::core::io::{NativeStorage, Storage};
use storyreel::core::state::RunResult;
use storyreel::services::leonardo::LeonardoClient;
use storyreel::services::llm::create_llm;
use storyreel::services::media::MediaGenerator;
use storyreel::services::render::FfmpegRenderer;
use storyreel::services::tts::create_tts_client;
use storyreel::services::workflow::StoryWorkflow;

/// Generate an illustrated, narrated short story from a few theme keywords.
#[derive(Parser, Debug)]
#[command(name = "storyreel", version, about)]
struct Cli {
    /// Theme keywords for the story
    #[arg(required = true)]
    keywords: Vec<String>,

    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Run identifier; rerunning with the same id resumes from checkpoints
    #[arg(long, default_value = "default_thread")]
    thread_id: String,

    /// Number of keyframes to tell the story in
    #[arg(long)]
    keyframes: Option<usize>,

    /// Directory for generated files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    extract_characters: bool,

    #[arg(long)]
    voiceover: bool,

    #[arg(long)]
    images: bool,

    /// Animate generated images (implies --images)
    #[arg(long)]
    motion: bool,

    #[arg(long)]
    save_script: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Command-line switches only ever turn features on.
    fn apply(&self, config: &mut Config) {
        let run = &mut config.run;
        run.extract_characters |= self.extract_characters;
        run.generate_voiceover |= self.voiceover;
        run.generate_images |= self.images || self.motion;
        run.generate_motion |= self.motion;
        run.save_script |= self.save_script;
        if let Some(count) = self.keyframes {
            run.keyframe_count = count;
        }
        if let Some(dir) = &self.output_dir {
            run.output_dir = dir.clone();
        }
    }
}

fn print_summary(result: &RunResult, config: &Config) {
    println!("Story complete: {} keyframes", result.keyframes.len());
    for (i, keyframe) in result.keyframes.iter().enumerate() {
        println!("  {}. {}", i + 1, keyframe.scenes[0].title);
        for scene in &keyframe.scenes {
            println!("     {}: {}", scene.character.name, scene.dialog_text);
        }
    }
    let images = result.scenes().filter(|s| s.image_ref.is_some()).count();
    let clips = result.scenes().filter(|s| s.video_ref.is_some()).count();
    let audio = result.scenes().filter(|s| s.audio_ref.is_some()).count();
    if config.run.generate_images {
        println!("Images: {}/{}", images, result.scenes().count());
    }
    if config.run.generate_motion {
        println!("Clips: {}/{}", clips, result.scenes().count());
    }
    if config.run.generate_voiceover {
        println!("Voiceovers: {}/{}", audio, result.scenes().count());
    }
    println!("Output: {}", config.run.output_dir.display());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            return Err(e);
        }
    };
    config.apply_env();
    cli.apply(&mut config);
    config.validate()?;
    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let checkpoints = Arc::new(StorageRunStore::new(config.checkpoint_folder(), storage.clone()));
    let llm = create_llm(&config)?;

    let mut workflow = StoryWorkflow::new(config.clone(), llm, storage.clone(), checkpoints);

    if config.run.generate_images || config.run.generate_motion {
        let leonardo = Arc::new(LeonardoClient::new(&config.images)?);
        let renderer = Arc::new(FfmpegRenderer::from_config(&config.render));
        workflow = workflow.with_media(MediaGenerator::new(
            leonardo.clone(),
            leonardo,
            renderer,
            storage.clone(),
            &config.images,
            &config.render,
        ));
    }
    if config.run.generate_voiceover {
        workflow = workflow.with_tts(create_tts_client(&config)?);
    }

    info!("Starting run '{}'", cli.thread_id);
    let result = workflow.run(&cli.thread_id, &cli.keywords).await?;
    print_summary(&result, &config);

    Ok(())
}
