//! Topic creation through the bot.
//!
//! New topics are screened for appropriateness and duplication before they
//! reach the forum, and indexed for vector search once created.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::discourse::{Category, CreatedPost, Forum};
use crate::duplicate::DuplicateDetector;
use crate::moderation::ModerationAdapter;
use crate::verdict::within;

/// Body of `POST /api/topics`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTopic {
    pub title: String,
    pub content: String,
    pub category_id: i64,
}

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("Inappropriate content: {0}")]
    Inappropriate(String),

    #[error("Similar topic found: {explanation}. Similar topic ID: {topic_id}")]
    Duplicate { topic_id: i64, explanation: String },

    #[error("Failed to create topic: {0:#}")]
    Forum(anyhow::Error),
}

#[derive(Clone)]
pub struct TopicService {
    forum: Arc<dyn Forum>,
    adapter: ModerationAdapter,
    detector: DuplicateDetector,
    call_timeout: Duration,
}

impl TopicService {
    #[must_use]
    pub fn new(
        forum: Arc<dyn Forum>,
        adapter: ModerationAdapter,
        detector: DuplicateDetector,
        call_timeout: Duration,
    ) -> Self {
        Self {
            forum,
            adapter,
            detector,
            call_timeout,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the forum request fails.
    pub async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        within(self.call_timeout, "Categories", self.forum.get_categories())
            .await
            .context("Failed to fetch categories")
    }

    /// Create a topic unless it is inappropriate or duplicates an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Inappropriate`] or [`TopicError::Duplicate`] when
    /// the topic is refused, [`TopicError::Forum`] when creation fails.
    pub async fn create_topic(&self, topic: &NewTopic) -> Result<CreatedPost, TopicError> {
        let moderation = self.adapter.assess(&topic.content).await;
        if !moderation.is_appropriate {
            return Err(TopicError::Inappropriate(moderation.explanation));
        }

        let similarity = self
            .detector
            .check_duplication(&topic.title, &topic.content, None)
            .await;
        if let Some(topic_id) = similarity.similar_topic_id.filter(|_| similarity.is_duplicate) {
            return Err(TopicError::Duplicate {
                topic_id,
                explanation: similarity.explanation,
            });
        }

        let created = within(
            self.call_timeout,
            "Create topic",
            self.forum
                .create_topic(&topic.title, &topic.content, topic.category_id),
        )
        .await
        .map_err(TopicError::Forum)?;
        info!(topic_id = created.topic_id, "Created topic");

        self.detector
            .vector()
            .index_topic(created.topic_id, &topic.title, &topic.content)
            .await;
        Ok(created)
    }
}
