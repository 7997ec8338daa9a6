//! Duplicate-topic detection.
//!
//! Both signals are consulted. The language-model comparison is authoritative
//! whenever it produced an understood answer; otherwise the vector verdict
//! stands. A duplicate is reported to the operators together with the title
//! and opening post of the existing topic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::discourse::{topic_url, CandidateTopic, Forum};
use crate::notify::NotificationSink;
use crate::similarity::{DeepSignal, SimilarityVerdict, VectorSignal};
use crate::verdict::{within, Verdict};

/// The existing topic a new one was found to duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingTopic {
    pub id: i64,
    pub title: String,
    pub first_post: String,
}

/// Everything the detector found out about one new topic.
#[derive(Debug, Clone)]
pub struct DuplicateReport {
    pub verdict: SimilarityVerdict,
    /// Ids of the topics shown to the language model, in prompt order.
    pub candidate_ids: Vec<i64>,
    /// Filled in for duplicates when the existing topic could be loaded.
    pub existing: Option<ExistingTopic>,
}

#[derive(Clone)]
pub struct DuplicateDetector {
    forum: Arc<dyn Forum>,
    vector: VectorSignal,
    deep: DeepSignal,
    notifier: Arc<dyn NotificationSink>,
    recent_limit: usize,
    call_timeout: Duration,
}

impl DuplicateDetector {
    #[must_use]
    pub fn new(
        forum: Arc<dyn Forum>,
        vector: VectorSignal,
        deep: DeepSignal,
        notifier: Arc<dyn NotificationSink>,
        recent_limit: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            forum,
            vector,
            deep,
            notifier,
            recent_limit,
            call_timeout,
        }
    }

    /// The vector signal, for indexing topics after creation.
    #[must_use]
    pub fn vector(&self) -> &VectorSignal {
        &self.vector
    }

    /// Decide whether a new topic duplicates an existing one, notifying on a match.
    ///
    /// `exclude` is the new topic's own id when it already exists on the
    /// forum; it is never offered as a candidate nor reported as the match.
    pub async fn check_duplication(
        &self,
        title: &str,
        content: &str,
        exclude: Option<i64>,
    ) -> SimilarityVerdict {
        let report = self.detect(title, content, exclude).await;
        if report.verdict.is_duplicate {
            self.notifier
                .send(&duplicate_notification(
                    self.forum.base_url(),
                    title,
                    content,
                    &report,
                ))
                .await;
        }
        report.verdict
    }

    /// Run both signals and merge them, without notifying.
    pub async fn detect(&self, title: &str, content: &str, exclude: Option<i64>) -> DuplicateReport {
        let recent = match within(
            self.call_timeout,
            "Recent topics",
            self.forum.get_recent_topics(self.recent_limit),
        )
        .await
        {
            Ok(topics) => topics,
            Err(e) => {
                warn!("Failed to fetch recent topics, comparing without them: {e:#}");
                Vec::new()
            }
        };

        let vector_verdict = self.vector.check(title, content, exclude).await;
        let vector_hit = match &vector_verdict {
            Verdict::Ok(SimilarityVerdict {
                is_duplicate: true,
                similar_topic_id: Some(id),
                ..
            }) => self.load_candidate(*id).await,
            _ => None,
        };

        let candidates = merge_candidates(vector_hit, recent, exclude);
        let candidate_ids = candidates.iter().map(|c| c.id).collect();

        let verdict = match self.deep.check(title, content, &candidates).await {
            Verdict::Ok(verdict) => verdict,
            failed => {
                warn!(deep = %failed, vector = %vector_verdict, "Deep similarity check unusable, using vector verdict");
                vector_verdict.into_safe(SimilarityVerdict::unique)
            }
        };

        // A duplicate must name another topic.
        let verdict = match verdict {
            SimilarityVerdict {
                is_duplicate: true,
                similar_topic_id,
                explanation,
            } if similar_topic_id.is_none() || similar_topic_id == exclude => {
                SimilarityVerdict::unique(explanation)
            }
            other => other,
        };

        let existing = match verdict.similar_topic_id {
            Some(id) if verdict.is_duplicate => {
                info!(similar_topic_id = id, explanation = %verdict.explanation, "Duplicate topic detected");
                self.load_existing(id).await
            }
            _ => None,
        };

        DuplicateReport {
            verdict,
            candidate_ids,
            existing,
        }
    }

    async fn load_candidate(&self, topic_id: i64) -> Option<CandidateTopic> {
        match within(self.call_timeout, "Topic lookup", self.forum.get_topic(topic_id)).await {
            Ok(topic) => Some(topic.to_candidate()),
            Err(e) => {
                warn!(topic_id, "Failed to load vector match: {e:#}");
                None
            }
        }
    }

    async fn load_existing(&self, topic_id: i64) -> Option<ExistingTopic> {
        match within(self.call_timeout, "Topic lookup", self.forum.get_topic(topic_id)).await {
            Ok(topic) => Some(ExistingTopic {
                id: topic.id,
                first_post: topic.first_post_text().unwrap_or_default(),
                title: topic.title,
            }),
            Err(e) => {
                warn!(topic_id, "Failed to load duplicated topic for notification: {e:#}");
                None
            }
        }
    }
}

/// Candidate pool for the model: the vector match first, then recent topics,
/// each topic id at most once and never the `exclude`d topic.
#[must_use]
pub fn merge_candidates(
    vector_hit: Option<CandidateTopic>,
    recent: Vec<CandidateTopic>,
    exclude: Option<i64>,
) -> Vec<CandidateTopic> {
    let mut seen: HashSet<i64> = exclude.into_iter().collect();
    vector_hit
        .into_iter()
        .chain(recent)
        .filter(|c| seen.insert(c.id))
        .collect()
}

fn duplicate_notification(
    base_url: &str,
    title: &str,
    content: &str,
    report: &DuplicateReport,
) -> String {
    let topic_id = report.verdict.similar_topic_id.unwrap_or_default();
    let (existing_title, existing_body) = report.existing.as_ref().map_or(
        ("(unavailable)", "(unavailable)"),
        |e| (e.title.as_str(), e.first_post.as_str()),
    );

    format!(
        "Similar topic detected\n\n\
         *New topic*\nTitle: {title}\nContent:\n```\n{content}\n```\n\n\
         *Existing topic*\nTitle: {existing_title}\nContent:\n```\n{existing_body}\n```\n\n\
         Reason: {}\nSimilar topic ID: {topic_id}\n{}",
        report.verdict.explanation,
        topic_url(base_url, topic_id, None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeForum, FakeVectorIndex, RecordingNotifier, ScriptedModel};
    use crate::vector::Neighbor;

    fn candidate(id: i64, title: &str) -> CandidateTopic {
        CandidateTopic {
            id,
            title: title.to_string(),
            excerpt: None,
        }
    }

    fn detector(
        forum: Arc<FakeForum>,
        index: Option<Arc<FakeVectorIndex>>,
        model: Arc<ScriptedModel>,
        notifier: Arc<RecordingNotifier>,
    ) -> DuplicateDetector {
        let timeout = Duration::from_secs(1);
        let index = index.map(|i| i as Arc<dyn crate::vector::VectorIndex>);
        DuplicateDetector::new(
            forum,
            VectorSignal::new(index, 0.85, timeout),
            DeepSignal::new(model, timeout),
            notifier,
            20,
            timeout,
        )
    }

    fn near(id: &str, distance: f32) -> Arc<FakeVectorIndex> {
        Arc::new(FakeVectorIndex::with_neighbors(vec![Neighbor {
            id: id.to_string(),
            distance,
        }]))
    }

    #[test]
    fn test_merge_candidates_dedups_ids() {
        let merged = merge_candidates(
            Some(candidate(7, "from vector")),
            vec![candidate(3, "a"), candidate(7, "recent copy"), candidate(3, "again")],
            None,
        );
        let ids: Vec<i64> = merged.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 3]);
        assert_eq!(merged[0].title, "from vector");
    }

    #[test]
    fn test_merge_candidates_drops_excluded_topic() {
        let merged = merge_candidates(
            Some(candidate(10, "itself")),
            vec![candidate(10, "itself"), candidate(3, "a")],
            Some(10),
        );
        let ids: Vec<i64> = merged.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn test_vector_match_is_loaded_as_candidate() {
        let forum = Arc::new(FakeForum::new().with_topic(42, "Bike lanes", "<p>More lanes</p>"));
        let model = Arc::new(ScriptedModel::replying(["NO | different | 0"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum.clone(), Some(near("42", 0.95)), model.clone(), notifier);

        let report = detector.detect("Cycling", "safer cycling", None).await;
        assert_eq!(forum.requested_topics(), vec![42]);
        assert_eq!(report.candidate_ids, vec![42]);
        assert!(model.prompts()[0].contains("Topic 42: Bike lanes"));
    }

    #[tokio::test]
    async fn test_model_naming_excluded_topic_is_unique() {
        let forum = Arc::new(
            FakeForum::new()
                .with_recent_topics(vec![candidate(3, "Parks")])
                .with_topic(10, "Tram line", "<p>extend the tram</p>"),
        );
        let model = Arc::new(ScriptedModel::replying(["YES | same | 10"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, None, model, notifier.clone());

        let verdict = detector.check_duplication("Tram line", "extend the tram", Some(10)).await;
        assert!(!verdict.is_duplicate);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_vector_match_joins_candidate_pool_once() {
        let forum = Arc::new(
            FakeForum::new()
                .with_recent_topics(vec![candidate(42, "Bike lanes"), candidate(5, "Parks")])
                .with_topic(42, "Bike lanes", "<p>More lanes</p>"),
        );
        let model = Arc::new(ScriptedModel::replying(["NO | different | 0"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, Some(near("42", 0.95)), model.clone(), notifier.clone());

        let report = detector.detect("Cycling", "safer cycling", None).await;
        assert_eq!(report.candidate_ids, vec![42, 5]);
        assert_eq!(model.prompts()[0].matches("Topic 42:").count(), 1);
        // The model answered, so its verdict wins over the vector match.
        assert!(!report.verdict.is_duplicate);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_deep_duplicate_is_enriched_and_notified() {
        let forum = Arc::new(
            FakeForum::new()
                .with_recent_topics(vec![candidate(42, "Bike lanes")])
                .with_topic(42, "Bike lanes", "<p>More <b>lanes</b></p>"),
        );
        let model = Arc::new(ScriptedModel::replying(["YES | same proposal | 42"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, None, model, notifier.clone());

        let verdict = detector.check_duplication("Cycle lanes", "we need lanes", None).await;
        assert_eq!(verdict, SimilarityVerdict::duplicate_of(42, "same proposal"));

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Title: Cycle lanes"));
        assert!(messages[0].contains("Title: Bike lanes"));
        assert!(messages[0].contains("More lanes"));
        assert!(messages[0].contains("https://forum.example.com/t/42"));
    }

    #[tokio::test]
    async fn test_unusable_model_falls_back_to_vector() {
        let forum = Arc::new(FakeForum::new().with_topic(42, "Bike lanes", "<p>lanes</p>"));
        let model = Arc::new(ScriptedModel::failing("quota exceeded"));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, Some(near("42", 0.9)), model, notifier.clone());

        let verdict = detector.check_duplication("Cycling", "lanes", None).await;
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.similar_topic_id, Some(42));
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_answer_without_vector_is_unique() {
        let forum = Arc::new(FakeForum::new().with_recent_topics(vec![candidate(1, "a")]));
        let model = Arc::new(ScriptedModel::replying(["garbage"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, None, model, notifier.clone());

        let verdict = detector.check_duplication("T", "body", None).await;
        assert!(!verdict.is_duplicate);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_recent_topics_failure_still_checks() {
        let forum = Arc::new(FakeForum::new().with_topic(42, "Bike lanes", "<p>lanes</p>"));
        forum.fail_recent_topics();
        let model = Arc::new(ScriptedModel::replying(["YES | same | 42"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, Some(near("42", 0.99)), model, notifier);

        let report = detector.detect("Cycling", "lanes", None).await;
        assert_eq!(report.candidate_ids, vec![42]);
        assert!(report.verdict.is_duplicate);
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_verdict() {
        let forum = Arc::new(FakeForum::new().with_recent_topics(vec![candidate(42, "Bike lanes")]));
        forum.fail_topic_lookups();
        let model = Arc::new(ScriptedModel::replying(["YES | same | 42"]));
        let notifier = Arc::new(RecordingNotifier::default());
        let detector = detector(forum, None, model, notifier.clone());

        let verdict = detector.check_duplication("Cycling", "lanes", None).await;
        assert!(verdict.is_duplicate);
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("(unavailable)"));
    }
}
