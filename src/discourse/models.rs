use serde::{Deserialize, Serialize};

use crate::text::html_to_text;

/// Candidate excerpts longer than this are cut before reaching a prompt.
const EXCERPT_MAX_CHARS: usize = 500;

/// Inbound webhook body. Discourse sends one object per event type; only
/// `post` events are handled.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub post: PostEvent,
}

/// A post as delivered by the Discourse `post_created` webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEvent {
    pub id: i64,
    #[serde(default)]
    pub topic_id: Option<i64>,
    #[serde(default)]
    pub raw: Option<String>,
    /// Only present on the first post of a topic.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cooked: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

impl PostEvent {
    /// Raw body, if present and not blank.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.raw.as_deref().filter(|raw| !raw.trim().is_empty())
    }

    /// Title, if present and not blank.
    #[must_use]
    pub fn topic_title(&self) -> Option<&str> {
        self.title.as_deref().filter(|title| !title.trim().is_empty())
    }
}

/// A forum category from `/categories.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoriesResponse {
    pub category_list: CategoryList,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryList {
    pub categories: Vec<Category>,
}

/// A topic proposed for duplicate comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTopic {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub excerpt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LatestResponse {
    pub topic_list: TopicList,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopicList {
    #[serde(default)]
    pub topics: Vec<CandidateTopic>,
}

/// A topic from `/t/{id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub posts_count: u64,
    #[serde(default)]
    pub post_stream: PostStream,
}

impl Topic {
    /// Plain text of the first post, if it was loaded.
    #[must_use]
    pub fn first_post_text(&self) -> Option<String> {
        self.post_stream
            .posts
            .iter()
            .min_by_key(|p| p.post_number)
            .map(|p| html_to_text(&p.cooked))
    }

    /// Reduce to a duplicate candidate, using the first post as excerpt.
    #[must_use]
    pub fn to_candidate(&self) -> CandidateTopic {
        CandidateTopic {
            id: self.id,
            title: self.title.clone(),
            excerpt: self
                .first_post_text()
                .map(|text| truncate_chars(&text, EXCERPT_MAX_CHARS)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostStream {
    #[serde(default)]
    pub posts: Vec<Post>,
    /// Every post id in the topic, in order. `posts` only carries the first chunk.
    #[serde(default)]
    pub stream: Vec<i64>,
}

/// A post inside a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub post_number: i64,
    #[serde(default)]
    pub cooked: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostsResponse {
    pub post_stream: PostStream,
}

/// Response to creating a topic or reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPost {
    pub id: i64,
    pub topic_id: i64,
    #[serde(default)]
    pub post_number: Option<i64>,
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
