//! Content-policy checks for new posts.
//!
//! [`ModerationAdapter::assess`] fails open: when the language model cannot
//! give a usable answer the post is treated as appropriate, so an outage
//! never removes user content.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::ModerationAction;
use crate::discourse::{Forum, PostEvent};
use crate::llm::LanguageModel;
use crate::notify::NotificationSink;
use crate::text::clean_for_classifier;
use crate::verdict::{within, Verdict};

/// Appropriateness judgment for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub is_appropriate: bool,
    pub explanation: String,
}

/// Wraps the language-model call that classifies content.
#[derive(Clone)]
pub struct ModerationAdapter {
    model: Arc<dyn LanguageModel>,
    call_timeout: Duration,
}

impl ModerationAdapter {
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, call_timeout: Duration) -> Self {
        Self {
            model,
            call_timeout,
        }
    }

    /// Ask the model, reporting degraded and malformed answers as such.
    pub async fn judge(&self, content: &str) -> Verdict<ModerationVerdict> {
        let prompt = build_moderation_prompt(&clean_for_classifier(content));
        match within(self.call_timeout, "Moderation call", self.model.generate(&prompt)).await {
            Ok(text) => parse_moderation_response(&text),
            Err(e) => Verdict::degraded("Error in content appropriateness check", &e),
        }
    }

    /// Judge `content`, defaulting to appropriate when no usable answer exists.
    pub async fn assess(&self, content: &str) -> ModerationVerdict {
        let verdict = self.judge(content).await;
        if !verdict.is_ok() {
            warn!(%verdict, "Moderation judgment unavailable, allowing content");
        }
        verdict.into_safe(|reason| ModerationVerdict {
            is_appropriate: true,
            explanation: reason,
        })
    }
}

fn build_moderation_prompt(content: &str) -> String {
    format!(
        "Please analyze the following content and determine if it is appropriate for a public forum.\n\
         Consider factors like hate speech, explicit content, harassment, spam, or other inappropriate content.\n\
         Content to analyze: {content}\n\n\
         Respond with a clear YES if the content is appropriate, or NO if it's inappropriate.\n\
         Also provide a brief explanation of your decision."
    )
}

/// Parse a `YES ...` / `NO ...` answer. Anything else is malformed.
#[must_use]
pub fn parse_moderation_response(text: &str) -> Verdict<ModerationVerdict> {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return Verdict::Invalid("Empty response from AI".to_string());
    };

    let decision = first
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    let is_appropriate = match decision.as_str() {
        "yes" => true,
        "no" => false,
        _ => return Verdict::Invalid(format!("Unrecognised moderation answer: {first}")),
    };

    Verdict::Ok(ModerationVerdict {
        is_appropriate,
        explanation: words.collect::<Vec<_>>().join(" "),
    })
}

/// What the moderation task did with a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    /// Nothing to judge.
    Skipped,
    Appropriate,
    /// Violation reported to the operators only.
    Reported,
    /// Violation reported, post deleted and the deletion notice posted.
    Deleted,
    /// Deletion was attempted and failed; the violation was still reported.
    DeleteFailed,
}

/// Background unit that moderates one post.
#[derive(Clone)]
pub struct Moderator {
    adapter: ModerationAdapter,
    forum: Arc<dyn Forum>,
    notifier: Arc<dyn NotificationSink>,
    action: ModerationAction,
    dry_run: bool,
    deletion_message: String,
    call_timeout: Duration,
}

impl Moderator {
    #[must_use]
    pub fn new(
        adapter: ModerationAdapter,
        forum: Arc<dyn Forum>,
        notifier: Arc<dyn NotificationSink>,
        action: ModerationAction,
        dry_run: bool,
        deletion_message: String,
        call_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            forum,
            notifier,
            action,
            dry_run,
            deletion_message,
            call_timeout,
        }
    }

    /// Judge the post and act on a violation.
    ///
    /// # Errors
    ///
    /// Returns an error if posting the deletion notice fails after the post
    /// was deleted.
    pub async fn handle(&self, post: &PostEvent) -> Result<ModerationOutcome> {
        let Some(content) = post.content() else {
            return Ok(ModerationOutcome::Skipped);
        };

        let verdict = self.adapter.assess(content).await;
        if verdict.is_appropriate {
            info!(post_id = post.id, "Post passed moderation");
            return Ok(ModerationOutcome::Appropriate);
        }

        warn!(post_id = post.id, explanation = %verdict.explanation, "Inappropriate content detected");
        self.notifier
            .send(&format!(
                "Inappropriate post detected\nPost ID: {}\nTopic ID: {}\nContent:\n```\n{}\n```\nReason: {}",
                post.id,
                post.topic_id
                    .map_or_else(|| "unknown".to_string(), |id| id.to_string()),
                content,
                verdict.explanation
            ))
            .await;

        if self.action == ModerationAction::Notify {
            return Ok(ModerationOutcome::Reported);
        }
        if self.dry_run {
            info!(post_id = post.id, "Dry run: skipping deletion");
            return Ok(ModerationOutcome::Reported);
        }

        if let Err(e) = within(self.call_timeout, "Delete post", self.forum.delete_post(post.id)).await {
            warn!(post_id = post.id, "Failed to delete inappropriate post: {e:#}");
            return Ok(ModerationOutcome::DeleteFailed);
        }

        // The notice is only posted once the deletion went through.
        if let Some(topic_id) = post.topic_id {
            within(
                self.call_timeout,
                "Deletion notice",
                self.forum.create_reply(topic_id, &self.deletion_message),
            )
            .await?;
        }
        info!(post_id = post.id, "Moderated post deleted");
        Ok(ModerationOutcome::Deleted)
    }
}
