//! Scoreloop - multi-role content refinement loop
//!
//! CLI entry point for running the loop and reading back saved posts.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use poststore::PostStore;
use scoreloop::cli::{Cli, Command, OutputFormat};
use scoreloop::config::Config;
use scoreloop::convergence::{ConvergenceLoop, LoopConfig, Session};
use scoreloop::llm::{CompletionRequest, create_client};
use scoreloop::pipeline::build_pipeline;
use scoreloop::present::Presenter;
use scoreloop::publish::build_post;
use scoreloop::roles::{PipelineMode, PromptContext};
use scoreloop::search::{SearchProvider, TavilyClient};

/// Snapshots buffered between the loop and the printer
const SNAPSHOT_BUFFER: usize = 16;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = scoreloop::cli::get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            topic,
            target,
            keywords,
            max_rounds,
            model,
            mode,
            search,
            roles,
            no_save,
            format,
        } => {
            let mut config = config;
            if let Some(target) = target {
                config.loop_settings.target_score = target;
            }
            if let Some(max_rounds) = max_rounds {
                config.loop_settings.max_rounds = max_rounds;
            }
            if let Some(model) = model {
                config.llm.model = model;
            }
            if let Some(mode) = mode {
                config.pipeline.mode = mode;
            }
            if search {
                config.search.enabled = true;
            }
            cmd_run(&config, topic, keywords, roles, !no_save, format).await
        }
        Command::Posts { limit, format } => cmd_posts(&config, limit, format).await,
        Command::Show { id, format } => cmd_show(&config, id, format).await,
        Command::Check { ping } => cmd_check(&config, ping).await,
    }
}

async fn cmd_run(
    config: &Config,
    topic: String,
    keywords: Vec<String>,
    selected_roles: Vec<String>,
    save: bool,
    format: OutputFormat,
) -> Result<()> {
    debug!(%topic, ?keywords, save, "cmd_run: called");
    // Fail before any round starts when credentials or bounds are wrong
    config.validate()?;

    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    let roster = config.pipeline.roster();
    let session = Session::new(
        topic,
        config.loop_settings.target_score,
        keywords,
        config.loop_settings.max_rounds,
    )?;

    let search: Option<(Arc<dyn SearchProvider>, usize)> =
        if config.search.enabled && config.pipeline.mode == PipelineMode::Roles {
            let client = TavilyClient::from_config(&config.search).context("Failed to create search client")?;
            Some((Arc::new(client), config.search.max_results))
        } else {
            if config.search.enabled {
                warn!("Search is only used by the roles pipeline, ignoring it");
            }
            None
        };

    let context = PromptContext::new(&session.topic, &session.keywords, session.target_score);
    let pipeline = build_pipeline(
        config.pipeline.mode,
        llm,
        &roster,
        context,
        config.llm.max_tokens,
        search,
    );
    let loop_config = LoopConfig::from_roster(
        &roster,
        config.loop_settings.markup,
        config.loop_settings.retry.clone(),
    );
    let presenter = Presenter::new(format, roster.names()).with_selected(selected_roles);

    if format == OutputFormat::Text {
        println!(
            "Running {} rounds max for \"{}\" (target {}/10)\n",
            session.max_rounds, session.topic, session.target_score
        );
    }

    let mut engine = ConvergenceLoop::new(session, loop_config, pipeline);
    let (tx, mut rx) = mpsc::channel(SNAPSHOT_BUFFER);
    let printer = async {
        while let Some(snapshot) = rx.recv().await {
            println!("{}", presenter.render_snapshot(&snapshot));
        }
    };
    let (result, ()) = tokio::join!(engine.run(Some(tx)), printer);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "cmd_run: loop failed");
            return Err(e).context("Convergence loop failed");
        }
    };
    println!("{}", presenter.render_outcome(&outcome));

    if save {
        let post = build_post(&outcome, &roster, &config.llm.model);
        let database = config.storage.database.clone();
        let id = tokio::task::spawn_blocking(move || -> Result<i64> {
            let mut store = PostStore::open(&database)?;
            store.save(&post)
        })
        .await
        .context("Save task panicked")??;
        info!(id, "cmd_run: post saved");
        if format == OutputFormat::Text {
            println!("Saved post #{}", id);
        }
    }
    Ok(())
}

async fn cmd_posts(config: &Config, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(limit, "cmd_posts: called");
    let database = config.storage.database.clone();
    let posts = tokio::task::spawn_blocking(move || PostStore::open(&database)?.list(limit))
        .await
        .context("Store task panicked")??;
    println!("{}", Presenter::new(format, Vec::new()).render_posts(&posts));
    Ok(())
}

async fn cmd_show(config: &Config, id: i64, format: OutputFormat) -> Result<()> {
    debug!(id, "cmd_show: called");
    let database: PathBuf = config.storage.database.clone();
    let post = tokio::task::spawn_blocking(move || PostStore::open(&database)?.get(id))
        .await
        .context("Store task panicked")??
        .ok_or_else(|| eyre::eyre!("Post {} not found", id))?;
    println!("{}", Presenter::new(format, Vec::new()).render_post(&post));
    Ok(())
}

async fn cmd_check(config: &Config, ping: bool) -> Result<()> {
    debug!(ping, "cmd_check: called");
    println!("Provider: {} ({})", config.llm.provider, config.llm.model);
    println!("Pipeline: {:?}", config.pipeline.mode);
    println!("Database: {}", config.storage.database.display());
    println!("Logs:     {}", scoreloop::cli::get_log_path().display());

    config.validate()?;
    println!("Configuration OK");

    if ping {
        let llm = create_client(&config.llm).context("Failed to create LLM client")?;
        let response = llm
            .complete(CompletionRequest::single("Reply with the single word OK.", "ping", 16))
            .await
            .context("LLM request failed")?;
        println!("LLM replied: {}", response.text_or_empty().trim());
    }
    Ok(())
}
