//! Discourse REST client.
//!
//! The orchestration code only talks to the forum through the [`Forum`]
//! trait; [`DiscourseClient`] is the production implementation.

mod models;

pub use models::{
    CandidateTopic, Category, CreatedPost, Post, PostEvent, PostStream, Topic, WebhookPayload,
};

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::config::Config;
use crate::constants::{BOT_USER_AGENT, DISCOURSE_POSTS_CHUNK};
use models::{CategoriesResponse, LatestResponse, PostsResponse};

/// Forum operations the bot depends on.
#[async_trait]
pub trait Forum: Send + Sync {
    /// Base URL used to build links back to the forum.
    fn base_url(&self) -> &str;

    async fn get_categories(&self) -> Result<Vec<Category>>;

    async fn create_topic(&self, title: &str, content: &str, category_id: i64)
        -> Result<CreatedPost>;

    async fn delete_post(&self, post_id: i64) -> Result<()>;

    async fn create_reply(&self, topic_id: i64, content: &str) -> Result<CreatedPost>;

    /// Most recent topics, newest first, at most `limit`.
    async fn get_recent_topics(&self, limit: usize) -> Result<Vec<CandidateTopic>>;

    async fn get_topic(&self, topic_id: i64) -> Result<Topic>;

    async fn get_topic_post_count(&self, topic_id: i64) -> Result<u64>;

    /// Every post of the topic, ordered by post number.
    async fn get_topic_posts(&self, topic_id: i64) -> Result<Vec<Post>>;
}

/// Link to a topic, or to a post within it.
#[must_use]
pub fn topic_url(base_url: &str, topic_id: i64, post_number: Option<i64>) -> String {
    match post_number {
        Some(n) => format!("{base_url}/t/{topic_id}/{n}"),
        None => format!("{base_url}/t/{topic_id}"),
    }
}

/// HTTP client for the Discourse API.
#[derive(Clone)]
pub struct DiscourseClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiscourseClient {
    /// Create a new Discourse client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API credentials are not valid header values or
    /// the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(&config.discourse_api_key).context("Invalid Discourse API key")?,
        );
        headers.insert(
            "Api-Username",
            HeaderValue::from_str(&config.discourse_api_username)
                .context("Invalid Discourse API username")?,
        );

        let http = reqwest::Client::builder()
            .timeout(config.external_call_timeout)
            .user_agent(BOT_USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.discourse_base_url.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Discourse GET");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        let response = check_status(response, "GET", path).await?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {path}"))
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Discourse POST");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        let response = check_status(response, "POST", path).await?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {path}"))
    }
}

async fn check_status(response: reqwest::Response, verb: &str, path: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    anyhow::bail!("Discourse {verb} {path} failed: {status} - {body}")
}

#[async_trait]
impl Forum for DiscourseClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_categories(&self) -> Result<Vec<Category>> {
        let response: CategoriesResponse = self.get_json("/categories.json").await?;
        Ok(response.category_list.categories)
    }

    async fn create_topic(
        &self,
        title: &str,
        content: &str,
        category_id: i64,
    ) -> Result<CreatedPost> {
        let created: CreatedPost = self
            .post_json(
                "/posts.json",
                json!({
                    "title": title,
                    "raw": content,
                    "category": category_id,
                    "archetype": "regular",
                }),
            )
            .await?;
        info!(topic_id = created.topic_id, "Created topic");
        Ok(created)
    }

    async fn delete_post(&self, post_id: i64) -> Result<()> {
        let path = format!("/posts/{post_id}.json");
        let url = format!("{}{path}", self.base_url);

        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        check_status(response, "DELETE", &path).await?;

        info!(post_id, "Deleted post");
        Ok(())
    }

    async fn create_reply(&self, topic_id: i64, content: &str) -> Result<CreatedPost> {
        let created: CreatedPost = self
            .post_json(
                "/posts.json",
                json!({
                    "topic_id": topic_id,
                    "raw": content,
                }),
            )
            .await?;
        info!(topic_id, post_id = created.id, "Created reply");
        Ok(created)
    }

    async fn get_recent_topics(&self, limit: usize) -> Result<Vec<CandidateTopic>> {
        let path = format!("/latest.json?no_definitions=true&page=0&per_page={limit}");
        let response: LatestResponse = self.get_json(&path).await?;
        let mut topics = response.topic_list.topics;
        topics.truncate(limit);
        Ok(topics)
    }

    async fn get_topic(&self, topic_id: i64) -> Result<Topic> {
        self.get_json(&format!("/t/{topic_id}.json")).await
    }

    async fn get_topic_post_count(&self, topic_id: i64) -> Result<u64> {
        Ok(self.get_topic(topic_id).await?.posts_count)
    }

    async fn get_topic_posts(&self, topic_id: i64) -> Result<Vec<Post>> {
        let topic = self.get_topic(topic_id).await?;
        let mut posts = topic.post_stream.posts;

        // The topic view only embeds the first chunk; fetch the rest by id.
        let loaded: HashSet<i64> = posts.iter().map(|p| p.id).collect();
        let missing: Vec<i64> = topic
            .post_stream
            .stream
            .iter()
            .copied()
            .filter(|id| !loaded.contains(id))
            .collect();

        for chunk in missing.chunks(DISCOURSE_POSTS_CHUNK) {
            let query = chunk
                .iter()
                .map(|id| format!("post_ids[]={id}"))
                .collect::<Vec<_>>()
                .join("&");
            let batch: PostsResponse = self
                .get_json(&format!("/t/{topic_id}/posts.json?{query}"))
                .await?;
            posts.extend(batch.post_stream.posts);
        }

        posts.sort_by_key(|p| p.post_number);
        posts.dedup_by_key(|p| p.id);
        debug!(topic_id, count = posts.len(), "Fetched topic posts");
        Ok(posts)
    }
}

impl std::fmt::Debug for DiscourseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscourseClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
