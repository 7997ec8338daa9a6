mod routes;
pub mod signature;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analysis::AnalysisScheduler;
use crate::config::Config;
use crate::discourse::Forum;
use crate::dispatcher::WebhookDispatcher;
use crate::duplicate::DuplicateDetector;
use crate::llm::LanguageModel;
use crate::moderation::{ModerationAdapter, Moderator};
use crate::notify::NotificationSink;
use crate::similarity::{DeepSignal, VectorSignal};
use crate::summary::SummaryService;
use crate::topics::TopicService;
use crate::vector::VectorIndex;

pub use routes::{ApiError, API_KEY_HEADER};
pub use signature::SIGNATURE_HEADER;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: WebhookDispatcher,
    pub topics: TopicService,
}

impl AppState {
    /// Wire every service from configuration and its collaborators.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        forum: Arc<dyn Forum>,
        model: Arc<dyn LanguageModel>,
        vector: Option<Arc<dyn VectorIndex>>,
        summary: Arc<dyn SummaryService>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let timeout = config.external_call_timeout;

        let adapter = ModerationAdapter::new(model.clone(), timeout);
        let detector = DuplicateDetector::new(
            forum.clone(),
            VectorSignal::new(vector, config.vector_similarity_threshold, timeout),
            DeepSignal::new(model.clone(), timeout),
            notifier.clone(),
            config.recent_topics_limit,
            timeout,
        );
        let moderator = Moderator::new(
            adapter.clone(),
            forum.clone(),
            notifier.clone(),
            config.moderation_action,
            config.dry_run,
            config.deletion_message.clone(),
            timeout,
        );
        let analysis = AnalysisScheduler::new(
            forum.clone(),
            summary,
            model,
            notifier,
            config.posts_threshold,
            config.dry_run,
            config.summary_embed_base_url.clone(),
            timeout,
        );

        let dispatcher = WebhookDispatcher::new(
            moderator,
            detector.clone(),
            analysis,
            config.deletion_message.clone(),
            config.analysis_trigger_token.clone(),
        );
        let topics = TopicService::new(forum, adapter, detector, timeout);

        Self {
            config,
            dispatcher,
            topics,
        }
    }
}

/// Start the web server and run until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn serve(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.web_host, state.config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Web server error")?;

    Ok(())
}

/// Create the main application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
