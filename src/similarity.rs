//! The two independent duplicate signals.
//!
//! * [`VectorSignal`] embeds the new topic and looks up its nearest
//!   neighbour in the vector index.
//! * [`DeepSignal`] asks the language model to compare the new topic with an
//!   explicit candidate list and answer `YES/NO | explanation | topic id`.
//!
//! Neither signal ever reports a duplicate it could not establish: outages
//! and unparsable answers both come back as non-duplicates.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::discourse::CandidateTopic;
use crate::llm::LanguageModel;
use crate::vector::VectorIndex;
use crate::verdict::{within, Verdict};

/// Explanation reported when the model's answer does not have the expected shape.
pub const INVALID_FORMAT: &str = "Invalid response format from AI";

/// Duplicate judgment from one signal, or the merged final decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityVerdict {
    pub is_duplicate: bool,
    pub explanation: String,
    pub similar_topic_id: Option<i64>,
}

impl SimilarityVerdict {
    #[must_use]
    pub fn unique(explanation: impl Into<String>) -> Self {
        Self {
            is_duplicate: false,
            explanation: explanation.into(),
            similar_topic_id: None,
        }
    }

    #[must_use]
    pub fn duplicate_of(topic_id: i64, explanation: impl Into<String>) -> Self {
        Self {
            is_duplicate: true,
            explanation: explanation.into(),
            similar_topic_id: Some(topic_id),
        }
    }
}

/// Text embedded for a topic: title and body on separate lines.
#[must_use]
pub fn embedding_text(title: &str, content: &str) -> String {
    format!("{title}\n{content}")
}

/// Nearest-neighbour duplicate signal.
#[derive(Clone)]
pub struct VectorSignal {
    index: Option<Arc<dyn VectorIndex>>,
    threshold: f32,
    call_timeout: Duration,
}

impl VectorSignal {
    /// `index` is `None` when vector search is not configured.
    #[must_use]
    pub fn new(index: Option<Arc<dyn VectorIndex>>, threshold: f32, call_timeout: Duration) -> Self {
        Self {
            index,
            threshold,
            call_timeout,
        }
    }

    /// Look up the closest indexed topic other than `exclude`.
    ///
    /// A topic that is already indexed is its own nearest neighbour, so the
    /// lookup asks for one extra neighbour when an id is excluded.
    pub async fn check(
        &self,
        title: &str,
        content: &str,
        exclude: Option<i64>,
    ) -> Verdict<SimilarityVerdict> {
        let Some(index) = &self.index else {
            return Verdict::Ok(SimilarityVerdict::unique("Vector search is not enabled"));
        };

        let text = embedding_text(title, content);
        let neighbors = within(self.call_timeout, "Vector search", async {
            let embedding = index.embed(&text).await?;
            index.nearest(embedding, if exclude.is_some() { 2 } else { 1 }).await
        })
        .await;

        let neighbors = match neighbors {
            Ok(n) => n,
            Err(e) => return Verdict::degraded("Error in similarity check", &e),
        };

        let Some(top) = neighbors
            .into_iter()
            .find(|n| exclude.is_none() || topic_id_from_neighbor(&n.id) != exclude)
        else {
            return Verdict::Ok(SimilarityVerdict::unique("No similar topics found"));
        };
        debug!(neighbor = %top.id, score = top.distance, "Nearest indexed topic");

        if top.distance < self.threshold {
            return Verdict::Ok(SimilarityVerdict::unique(format!(
                "No similar topics found above threshold {}",
                self.threshold
            )));
        }

        match topic_id_from_neighbor(&top.id) {
            Some(topic_id) => Verdict::Ok(SimilarityVerdict::duplicate_of(
                topic_id,
                format!("Similar topic found with score {}", top.distance),
            )),
            None => Verdict::Invalid(format!("Neighbour id {} carries no topic number", top.id)),
        }
    }

    /// [`Self::check`] collapsed to a verdict; failures read as "not a duplicate".
    pub async fn vector_check(&self, title: &str, content: &str) -> SimilarityVerdict {
        self.check(title, content, None)
            .await
            .into_safe(SimilarityVerdict::unique)
    }

    /// Add a topic to the index. Returns whether it was indexed.
    pub async fn index_topic(&self, topic_id: i64, title: &str, content: &str) -> bool {
        let Some(index) = &self.index else {
            return false;
        };

        let text = embedding_text(title, content);
        let result = within(self.call_timeout, "Vector upsert", async {
            let embedding = index.embed(&text).await?;
            index.upsert(&topic_id.to_string(), embedding).await
        })
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(topic_id, "Failed to index topic: {e:#}");
                false
            }
        }
    }
}

/// Index ids may carry a prefix (`topic_42`); the digits are the topic id.
fn topic_id_from_neighbor(id: &str) -> Option<i64> {
    let digits: String = id.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Language-model duplicate signal over an explicit candidate list.
#[derive(Clone)]
pub struct DeepSignal {
    model: Arc<dyn LanguageModel>,
    call_timeout: Duration,
}

impl DeepSignal {
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, call_timeout: Duration) -> Self {
        Self {
            model,
            call_timeout,
        }
    }

    /// Ask the model whether the new topic duplicates one of `candidates`.
    pub async fn check(
        &self,
        title: &str,
        content: &str,
        candidates: &[CandidateTopic],
    ) -> Verdict<SimilarityVerdict> {
        if candidates.is_empty() {
            return Verdict::Ok(SimilarityVerdict::unique("No existing topics to compare"));
        }

        let prompt = build_similarity_prompt(title, content, candidates);
        match within(self.call_timeout, "Similarity call", self.model.generate(&prompt)).await {
            Ok(text) => parse_similarity_response(&text),
            Err(e) => Verdict::degraded("Error in similarity check", &e),
        }
    }

    /// [`Self::check`] collapsed to a verdict; failures read as "not a duplicate".
    pub async fn deep_check(
        &self,
        title: &str,
        content: &str,
        candidates: &[CandidateTopic],
    ) -> SimilarityVerdict {
        self.check(title, content, candidates)
            .await
            .into_safe(SimilarityVerdict::unique)
    }
}

fn build_similarity_prompt(title: &str, content: &str, candidates: &[CandidateTopic]) -> String {
    let topics = candidates
        .iter()
        .map(|t| {
            format!(
                "Topic {}: {} - {}",
                t.id,
                t.title,
                t.excerpt.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Compare the following new content with the existing topics and determine if it is a duplicate or very similar.\n\
         Consider both the meaning and intent of the content, not just exact word matches.\n\n\
         New content:\n\
         Topic : {title} - {content}\n\n\
         Existing topics:\n\
         {topics}\n\n\
         Respond with:\n\
         1. YES if you find a duplicate/very similar topic, or NO if the content is unique\n\
         2. Brief explanation of your decision\n\
         3. If YES, the ID of the most similar topic. If NO, write 0\n\n\
         Format your response exactly as: YES/NO | Explanation | Topic ID"
    )
}

/// Parse the three-field `YES/NO | explanation | topic id` answer.
///
/// Wrong field count, an unknown decision word, or a `YES` without a
/// positive integer id are all malformed.
#[must_use]
pub fn parse_similarity_response(text: &str) -> Verdict<SimilarityVerdict> {
    let fields: Vec<&str> = text.trim().split('|').map(str::trim).collect();
    let [decision, explanation, topic_id] = fields.as_slice() else {
        return Verdict::Invalid(INVALID_FORMAT.to_string());
    };

    match decision.to_lowercase().as_str() {
        "yes" => match topic_id.parse::<i64>() {
            Ok(id) if id > 0 => Verdict::Ok(SimilarityVerdict::duplicate_of(id, *explanation)),
            _ => Verdict::Invalid(INVALID_FORMAT.to_string()),
        },
        "no" => Verdict::Ok(SimilarityVerdict::unique(*explanation)),
        _ => Verdict::Invalid(INVALID_FORMAT.to_string()),
    }
}
