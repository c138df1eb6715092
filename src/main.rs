use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reelsmith::cli::{Cli, Commands, LogFormat};
use reelsmith::config::Config;
use reelsmith::executors::{build_registry, Collaborators};
use reelsmith::fetch::{fetch_into_store, SourceFetcher, YtDlpFetcher};
use reelsmith::generate::{
    Generator, OllamaGenerator, PostGenerator, PostRules, PostValidator, PromptTemplates, SerializedGenerator,
};
use reelsmith::output;
use reelsmith::pipeline::{
    BatchRunner, ExistenceSnapshot, JobProcessor, OrchestratorSettings, PipelineOrchestrator, Playlist, StagePlan,
    VideoJob,
};
use reelsmith::publish::{BlueskyPublisher, SerializedPublisher, SocialPublisher};
use reelsmith::storage::{ArtifactStore, S3ArtifactStore};
use reelsmith::transcribe::{AwsTranscriber, Transcriber};
use reelsmith::utils;

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("reelsmith={}", level.to_lowercase()).into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn connect_store(config: &Config) -> Result<Arc<dyn ArtifactStore>> {
    let store = S3ArtifactStore::new(&config.storage).await?;
    store.ensure_bucket().await?;
    tracing::info!("Using artifact store {}", store.describe());
    Ok(Arc::new(store))
}

/// Wire every collaborator into an orchestrator
async fn build_orchestrator(
    config: &Config,
    store: Arc<dyn ArtifactStore>,
    quiet: bool,
) -> Result<PipelineOrchestrator> {
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(YtDlpFetcher::new());
    let transcriber: Arc<dyn Transcriber> = Arc::new(
        AwsTranscriber::new(config.transcription.clone())
            .await
            .with_progress(!quiet),
    );

    // one completion at a time across all concurrent jobs
    let generator: Arc<dyn Generator> = Arc::new(SerializedGenerator::new(Arc::new(OllamaGenerator::new(
        &config.generation,
    )?)));
    let templates = Arc::new(PromptTemplates::load(config.generation.prompts_dir.as_deref())?);

    let rules = PostRules {
        max_graphemes: config.generation.post_max_graphemes,
        min_hashtags: config.generation.post_min_hashtags,
    };
    let validator = PostValidator::new(generator.clone(), templates.clone(), rules);
    let posts = Arc::new(PostGenerator::new(
        generator.clone(),
        validator,
        templates.clone(),
        config.generation.post_max_iterations,
    ));

    let publisher: Option<Arc<dyn SocialPublisher>> = if config.social.enable_publish {
        let bluesky: Arc<dyn SocialPublisher> = Arc::new(BlueskyPublisher::new(&config.social)?);
        Some(Arc::new(SerializedPublisher::new(bluesky)))
    } else {
        None
    };

    let registry = build_registry(
        config,
        Collaborators {
            fetcher,
            transcriber,
            generator,
            templates,
            posts,
            publisher,
        },
    );

    Ok(
        PipelineOrchestrator::new(store, registry, StagePlan::from_config(config))
            .with_settings(OrchestratorSettings::from_config(config)),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    // Stage listing needs neither config nor external tools
    if let Commands::Stages = cli.command {
        let config = if Config::config_path().map(|p| p.exists()).unwrap_or(false) {
            Config::load().await?
        } else {
            let mut config = Config::default();
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        };
        println!("{}", output::format_stage_table(&StagePlan::from_config(&config)));
        return Ok(());
    }

    // Check for required external dependencies (non-fatal in Docker)
    let missing_deps = utils::check_dependencies().await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }

    let config = Config::load().await?;

    let success = match cli.command {
        Commands::Process { path, force, format } => {
            let store = connect_store(&config).await?;
            let orchestrator = build_orchestrator(&config, store, cli.quiet).await?;
            let job = VideoJob::from_path(&path);

            match orchestrator.run(&job, force).await {
                Ok(report) => {
                    output::print_job_report(&report, &format)?;
                    true
                }
                Err(e) => {
                    eprintln!("✗ {}: {:#}", job, e);
                    false
                }
            }
        }
        Commands::Playlist {
            name,
            force,
            order,
            format,
        } => {
            let store = connect_store(&config).await?;
            let playlist = Playlist::load(store.as_ref(), &config.pipeline.playlist_folder, &name).await?;
            let policy = order.unwrap_or(config.pipeline.ordering);
            let items = playlist.to_items(policy, &config.pipeline.downloads_folder);
            tracing::info!("Processing {} videos from {} ({})", items.len(), name, policy);

            let processor: Arc<dyn JobProcessor> = Arc::new(build_orchestrator(&config, store, cli.quiet).await?);
            let result = BatchRunner::new(processor)
                .with_concurrency(config.app.max_concurrent_jobs)
                .process_batch(items, force)
                .await;

            output::print_batch_result(&result, &format)?;
            result.all_succeeded()
        }
        Commands::Fetch {
            video_id,
            folder,
            process,
        } => {
            let store = connect_store(&config).await?;
            let folder = folder.unwrap_or_else(|| config.pipeline.downloads_folder.clone());
            let fetcher = YtDlpFetcher::new();
            let video_id = utils::youtube_video_id(&video_id).unwrap_or(video_id);

            let job = fetch_into_store(
                &fetcher,
                store.as_ref(),
                &folder,
                &video_id,
                &config.pipeline.source_extension,
            )
            .await?;
            println!("Stored {}", job);

            if process {
                let orchestrator = build_orchestrator(&config, store, cli.quiet).await?;
                orchestrator.process_video(&job, false).await
            } else {
                true
            }
        }
        Commands::Status { path, format } => {
            let store = connect_store(&config).await?;
            let job = VideoJob::from_path(&path);
            let stages = StagePlan::from_config(&config).stages();
            let snapshot = ExistenceSnapshot::capture(store.as_ref(), &job, &stages).await;
            output::print_snapshot(&job, &snapshot, &format)?;
            true
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration saved to: {}", Config::config_path()?.display());
            }
            true
        }
        Commands::Stages => unreachable!("handled before loading configuration"),
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
