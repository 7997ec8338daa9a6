use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use discourse_moderation_bot::config::{Config, ModerationAction};
use discourse_moderation_bot::discourse::{DiscourseClient, Forum};
use discourse_moderation_bot::llm::{GeminiClient, LanguageModel};
use discourse_moderation_bot::notify::{NotificationSink, SlackNotifier};
use discourse_moderation_bot::summary::{SummaryClient, SummaryService};
use discourse_moderation_bot::vector::{HttpVectorIndex, VectorIndex};
use discourse_moderation_bot::web::{self, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting discourse-moderation-bot");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        forum = %config.discourse_base_url,
        dry_run = config.dry_run,
        posts_threshold = config.posts_threshold,
        "Configuration loaded"
    );

    if config.dry_run {
        warn!("Dry run mode: deletions and analysis replies are suppressed");
    }
    if config.moderation_action == ModerationAction::Delete {
        info!("Moderation will delete inappropriate posts");
    }
    if config.slack_webhook_url.is_none() {
        warn!("SLACK_WEBHOOK_URL not set - notifications will only be logged");
    }

    let forum: Arc<dyn Forum> =
        Arc::new(DiscourseClient::new(&config).context("Failed to initialize Discourse client")?);
    let model: Arc<dyn LanguageModel> =
        Arc::new(GeminiClient::new(&config).context("Failed to initialize language model client")?);
    let summary: Arc<dyn SummaryService> =
        Arc::new(SummaryClient::new(&config).context("Failed to initialize summary client")?);
    let notifier: Arc<dyn NotificationSink> =
        Arc::new(SlackNotifier::new(&config).context("Failed to initialize Slack notifier")?);

    let vector: Option<Arc<dyn VectorIndex>> = match HttpVectorIndex::from_config(&config)
        .context("Failed to initialize vector index client")?
    {
        Some(index) => {
            info!("Vector search enabled");
            Some(Arc::new(index))
        }
        None => {
            info!("Vector search disabled");
            None
        }
    };

    let state = AppState::new(Arc::new(config), forum, model, vector, summary, notifier);

    web::serve(state, shutdown_signal()).await?;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,discourse_moderation_bot=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down...");
}
