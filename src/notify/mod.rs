//! Operator notifications.
//!
//! Every background task reports through a [`NotificationSink`]. The Slack
//! sink splits long messages instead of truncating them and holds a lock for
//! the duration of one message so its chunks are never interleaved with
//! another message's.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{BOT_USER_AGENT, SLACK_MAX_MESSAGE_LENGTH};

/// Outbound operator channel. Delivery is best-effort and never fails the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str);
}

/// Slack incoming-webhook notifier.
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: Option<String>,
    max_length: usize,
    send_lock: Mutex<()>,
}

impl SlackNotifier {
    /// Create a new notifier. Without a webhook URL messages are only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.external_call_timeout)
            .user_agent(BOT_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            webhook_url: config.slack_webhook_url.clone(),
            max_length: SLACK_MAX_MESSAGE_LENGTH,
            send_lock: Mutex::new(()),
        })
    }

    async fn post_chunk(&self, url: &str, header: &str, chunk: &str) -> anyhow::Result<()> {
        let payload = json!({
            "text": chunk,
            "blocks": [
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": header }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": chunk }
                }
            ]
        });

        let response = self.http.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Slack returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    async fn send(&self, message: &str) {
        let Some(url) = self.webhook_url.as_deref() else {
            info!(message = %message, "Slack webhook not configured, notification logged only");
            return;
        };

        let header = determine_header(message);
        let chunks = split_message(message, self.max_length);
        let _guard = self.send_lock.lock().await;
        for (i, chunk) in chunks.iter().enumerate() {
            match self.post_chunk(url, header, chunk).await {
                Ok(()) => debug!(part = i + 1, parts = chunks.len(), "Sent Slack notification"),
                Err(e) => warn!(part = i + 1, "Failed to send Slack notification: {e:#}"),
            }
        }
    }
}

impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackNotifier")
            .field("enabled", &self.webhook_url.is_some())
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}

/// Split `message` into chunks of at most `max_len` characters.
///
/// Chunks break on line boundaries; a single line longer than `max_len` is
/// cut at character boundaries. No text is dropped.
#[must_use]
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if message.chars().count() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in message.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { current_len + 1 + line_len };

        if needed <= max_len {
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= max_len {
            current.push_str(line);
            current_len = line_len;
        } else {
            let chars: Vec<char> = line.chars().collect();
            let mut pieces = chars.chunks(max_len).map(|c| c.iter().collect::<String>());
            let mut last = pieces.next().unwrap_or_default();
            for piece in pieces {
                chunks.push(std::mem::replace(&mut last, piece));
            }
            current_len = last.chars().count();
            current = last;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Pick the headline for a whole notification.
///
/// Only text the bot wrote is consulted: the opening line and, for
/// moderation reports, the trailing `Reason:` line. Quoted user content
/// never decides the header.
#[must_use]
pub fn determine_header(message: &str) -> &'static str {
    let opening = message.lines().next().unwrap_or_default().to_lowercase();

    if opening.contains("analysis complete") {
        return ":bar_chart: *Topic analysis complete*";
    }
    if opening.contains("analysis failed") {
        return ":x: *Topic analysis error*";
    }
    if opening.starts_with("similar topic") {
        return ":warning: *Similar topic detected*";
    }

    let reason = message
        .rfind("\nReason: ")
        .map(|at| message[at..].to_lowercase())
        .unwrap_or_default();
    if reason.contains("hate speech") {
        ":rage: *Hate speech detected*"
    } else if reason.contains("explicit content") {
        ":underage: *Explicit content detected*"
    } else if reason.contains("harassment") {
        ":angry: *Harassment detected*"
    } else if reason.contains("spam") {
        ":robot_face: *Spam detected*"
    } else {
        ":no_entry_sign: *Inappropriate content detected*"
    }
}
