use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scene2image::core::config::{Config, API_KEY_ENV};
use scene2image::core::scene::GenerationConfig;
use scene2image::core::state::JobOutcome;
use scene2image::services::generator::ConfiguredGenerators;
use scene2image::services::progress::ConsoleReporter;
use scene2image::services::workflow::{
    preview_prompts, BatchRequest, SingleSceneRequest, WorkflowManager,
};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "scene2image", version)]
struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate every scene and package the results.
    Batch(BatchArgs),
    /// Generate one scene.
    Single(SingleArgs),
    /// Print the prompts that would be sent, without calling the service.
    Prompt(PromptArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Scene description JSON.
    #[arg(long)]
    scenes: PathBuf,

    /// Make a single attempt per scene.
    #[arg(long)]
    no_retry: bool,

    /// Leave the generated PNGs on disk after archiving.
    #[arg(long)]
    keep_images: bool,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Scenes generated concurrently (defaults to `max_workers` from the config).
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Parser, Debug)]
struct SingleArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Scene index (0-based).
    #[arg(long)]
    index: usize,
}

#[derive(Parser, Debug)]
struct PromptArgs {
    /// Scene description JSON.
    #[arg(long)]
    scenes: PathBuf,

    /// Scene index (0-based); all scenes when omitted.
    #[arg(long)]
    index: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please check '{}'.", cli.config.display());
            return Err(e);
        }
    };

    match cli.cmd {
        Command::Prompt(args) => {
            let json = read_scenes(&args.scenes)?;
            for (scene, prompt) in preview_prompts(&json, args.index)? {
                println!("=== Scene {:02}: {} ===", scene.display_number, scene.title);
                println!("{}\n", prompt);
            }
        }
        Command::Batch(args) => {
            apply_run_flags(&mut config, &args.run);
            if let Some(workers) = args.workers {
                config.max_workers = workers.max(1);
            }
            let json = read_scenes(&args.run.scenes)?;
            let scenes = GenerationConfig::from_json(&json)?.scenes;
            let manager = manager(&config)?;
            let request = BatchRequest {
                credential: config.generator.gemini.api_key.clone(),
                scene_config_json: json,
                auto_retry: config.auto_retry,
                max_workers: config.max_workers,
            };

            let report = manager
                .run_batch(request, &ConsoleReporter::new(&scenes))
                .await?;
            println!("\n{}", report.summary());
        }
        Command::Single(args) => {
            apply_run_flags(&mut config, &args.run);
            let json = read_scenes(&args.run.scenes)?;
            let generation = GenerationConfig::from_json(&json)?;
            let scene = generation.scene(args.index)?.clone();
            let manager = manager(&config)?;
            let request = SingleSceneRequest {
                credential: config.generator.gemini.api_key.clone(),
                scene_config_json: json,
                auto_retry: config.auto_retry,
                scene_index: args.index,
            };

            let report = manager
                .run_single(request, &ConsoleReporter::new(std::slice::from_ref(&scene)))
                .await?;
            println!("\n{}", report.summary());
            if let Some(JobOutcome::Success { prompt, .. }) = report.results.first().map(|r| &r.outcome) {
                println!("\nPrompt used:\n{}", prompt);
            }
        }
    }

    Ok(())
}

fn apply_run_flags(config: &mut Config, args: &RunArgs) {
    if args.no_retry {
        config.auto_retry = false;
    }
    if args.keep_images {
        config.keep_work_dir = true;
    }
}

fn manager(config: &Config) -> Result<WorkflowManager> {
    if config.generator.gemini.api_key.trim().is_empty() {
        anyhow::bail!(
            "No API key configured. Set {} or generator.gemini.api_key in the config file.",
            API_KEY_ENV
        );
    }
    config.ensure_directories()?;
    Ok(WorkflowManager::new(
        config.clone(),
        Box::new(ConfiguredGenerators::new(config.generator.clone())),
    ))
}

fn read_scenes(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
