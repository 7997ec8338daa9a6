//! Shared constants used across the application.

/// User agent sent on every outbound collaborator request.
pub const BOT_USER_AGENT: &str = "discourse-moderation-bot/0.1";

/// Reply posted after a moderated post is deleted.
///
/// Also the self-event marker: webhook deliveries whose body equals this
/// notice are our own replies and must be ignored.
pub const DEFAULT_DELETION_MESSAGE: &str =
    "このコメントはガイドラインを違反しているため削除されました";

/// A topic is analysed every time its post count reaches a multiple of this.
pub const DEFAULT_POSTS_THRESHOLD: u64 = 6;

/// Reply substring that forces an analysis run.
pub const DEFAULT_ANALYSIS_TRIGGER_TOKEN: &str = "#analyze";

/// Minimum vector similarity score for the vector signal to report a duplicate.
pub const DEFAULT_VECTOR_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Number of recent topics used as the baseline duplicate candidate pool.
pub const DEFAULT_RECENT_TOPICS_LIMIT: usize = 20;

/// Slack rejects section blocks longer than this.
pub const SLACK_MAX_MESSAGE_LENGTH: usize = 3000;

/// Extraction topic given to the summary service for new projects.
pub const SUMMARY_EXTRACTION_TOPIC: &str = "ディスカッションの論点と意見の分布";

/// Discourse returns at most this many posts per `posts.json` request.
pub const DISCOURSE_POSTS_CHUNK: usize = 20;
