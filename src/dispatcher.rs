//! Webhook event dispatch.
//!
//! Each accepted post fans out into independent background tasks. The
//! request path only spawns them; a supervisor per task logs its error or
//! panic so a failing unit never affects its siblings or the response.

use std::future::Future;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisScheduler;
use crate::discourse::PostEvent;
use crate::duplicate::DuplicateDetector;
use crate::moderation::Moderator;

/// Why an event produced no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Deleted,
    /// The bot's own deletion notice coming back through the webhook.
    OwnNotice,
}

/// A unit of background work derived from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Moderation,
    DuplicateCheck,
    Analysis { topic_id: i64, force: bool },
}

impl TaskKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Moderation => "moderation",
            Self::DuplicateCheck => "duplicate_check",
            Self::Analysis { .. } => "analysis",
        }
    }
}

/// Decide which tasks an event needs.
///
/// # Errors
///
/// Returns the reason when the event must be ignored entirely.
pub fn plan(
    post: &PostEvent,
    deletion_message: &str,
    trigger_token: Option<&str>,
) -> Result<Vec<TaskKind>, IgnoreReason> {
    if post.deleted_at.is_some() {
        return Err(IgnoreReason::Deleted);
    }
    if post.raw.as_deref() == Some(deletion_message) {
        return Err(IgnoreReason::OwnNotice);
    }

    let mut tasks = Vec::new();
    if post.content().is_some() {
        tasks.push(TaskKind::Moderation);
    }
    match (post.topic_title(), post.topic_id) {
        (Some(_), _) => tasks.push(TaskKind::DuplicateCheck),
        (None, Some(topic_id)) => {
            let force = trigger_token.is_some_and(|token| {
                post.raw.as_deref().is_some_and(|raw| raw.contains(token))
            });
            tasks.push(TaskKind::Analysis { topic_id, force });
        }
        (None, None) => {}
    }
    Ok(tasks)
}

/// Result of handing one event to the dispatcher.
#[derive(Debug)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    Accepted(Accepted),
}

/// Tasks started for an accepted event.
#[derive(Debug)]
pub struct Accepted {
    pub tasks: Vec<TaskKind>,
    supervisors: Vec<JoinHandle<()>>,
}

impl Accepted {
    /// Wait until every task has finished. The webhook handler never does this.
    pub async fn finished(self) {
        for supervisor in self.supervisors {
            let _ = supervisor.await;
        }
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    moderator: Moderator,
    detector: DuplicateDetector,
    analysis: AnalysisScheduler,
    deletion_message: String,
    trigger_token: Option<String>,
}

impl WebhookDispatcher {
    #[must_use]
    pub fn new(
        moderator: Moderator,
        detector: DuplicateDetector,
        analysis: AnalysisScheduler,
        deletion_message: String,
        trigger_token: Option<String>,
    ) -> Self {
        Self {
            moderator,
            detector,
            analysis,
            deletion_message,
            trigger_token,
        }
    }

    /// Start the background work for `post` and return without waiting for it.
    pub fn dispatch(&self, post: PostEvent) -> Dispatch {
        let tasks = match plan(&post, &self.deletion_message, self.trigger_token.as_deref()) {
            Ok(tasks) => tasks,
            Err(reason) => {
                debug!(post_id = post.id, ?reason, "Ignoring webhook event");
                return Dispatch::Ignored(reason);
            }
        };
        info!(post_id = post.id, topic_id = ?post.topic_id, tasks = ?tasks, "Dispatching webhook event");

        let supervisors = tasks
            .iter()
            .map(|task| self.spawn_task(task, &post))
            .collect();
        Dispatch::Accepted(Accepted { tasks, supervisors })
    }

    fn spawn_task(&self, task: &TaskKind, post: &PostEvent) -> JoinHandle<()> {
        let name = task.name();
        let post_id = post.id;
        match task.clone() {
            TaskKind::Moderation => {
                let moderator = self.moderator.clone();
                let post = post.clone();
                supervise(name, post_id, async move {
                    let outcome = moderator.handle(&post).await?;
                    debug!(post_id = post.id, ?outcome, "Moderation finished");
                    Ok(())
                })
            }
            TaskKind::DuplicateCheck => {
                let detector = self.detector.clone();
                let title = post.topic_title().unwrap_or_default().to_string();
                let content = post.content().unwrap_or_default().to_string();
                let topic_id = post.topic_id;
                supervise(name, post_id, async move {
                    let verdict = detector.check_duplication(&title, &content, topic_id).await;
                    debug!(post_id, is_duplicate = verdict.is_duplicate, "Duplicate check finished");
                    Ok(())
                })
            }
            TaskKind::Analysis { topic_id, force } => {
                let analysis = self.analysis.clone();
                supervise(name, post_id, async move {
                    let outcome = analysis.maybe_trigger_analysis(topic_id, force).await;
                    debug!(post_id, topic_id, ?outcome, "Analysis check finished");
                    Ok(())
                })
            }
        }
    }
}

/// Spawn `unit` and a watcher that logs how it ended.
fn supervise<F>(task: &'static str, post_id: i64, unit: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(unit);
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task, post_id, "Background task failed: {e:#}"),
            Err(e) if e.is_panic() => error!(task, post_id, "Background task panicked: {e}"),
            Err(e) => warn!(task, post_id, "Background task cancelled: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::ModerationAction;
    use crate::discourse::CandidateTopic;
    use crate::moderation::ModerationAdapter;
    use crate::similarity::{DeepSignal, VectorSignal};
    use crate::testing::{FakeForum, FakeSummary, RecordingNotifier, ScriptedModel};

    const NOTICE: &str = "removed by the bot";

    fn event(id: i64, raw: Option<&str>, title: Option<&str>) -> PostEvent {
        PostEvent {
            id,
            topic_id: Some(10),
            raw: raw.map(str::to_string),
            title: title.map(str::to_string),
            cooked: None,
            deleted_at: None,
        }
    }

    struct Harness {
        dispatcher: WebhookDispatcher,
        forum: Arc<FakeForum>,
        moderation_model: Arc<ScriptedModel>,
        similarity_model: Arc<ScriptedModel>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(moderation_model: ScriptedModel, similarity_model: ScriptedModel) -> Harness {
        let timeout = Duration::from_secs(1);
        let forum = Arc::new(
            FakeForum::new()
                .with_recent_topics(vec![
                    CandidateTopic {
                        id: 10,
                        title: "Tram line".to_string(),
                        excerpt: Some("extend the tram".to_string()),
                    },
                    CandidateTopic {
                        id: 42,
                        title: "Bike lanes".to_string(),
                        excerpt: None,
                    },
                ])
                .with_topic(42, "Bike lanes", "<p>lanes</p>")
                .with_post_count(10, 3),
        );
        let moderation_model = Arc::new(moderation_model);
        let similarity_model = Arc::new(similarity_model);
        let notifier = Arc::new(RecordingNotifier::default());

        let moderator = Moderator::new(
            ModerationAdapter::new(moderation_model.clone(), timeout),
            forum.clone(),
            notifier.clone(),
            ModerationAction::Notify,
            false,
            NOTICE.to_string(),
            timeout,
        );
        let detector = DuplicateDetector::new(
            forum.clone(),
            VectorSignal::new(None, 0.85, timeout),
            DeepSignal::new(similarity_model.clone(), timeout),
            notifier.clone(),
            20,
            timeout,
        );
        let analysis = AnalysisScheduler::new(
            forum.clone(),
            Arc::new(FakeSummary::new()),
            similarity_model.clone(),
            notifier.clone(),
            6,
            true,
            "https://embed.example.com".to_string(),
            timeout,
        );

        Harness {
            dispatcher: WebhookDispatcher::new(
                moderator,
                detector,
                analysis,
                NOTICE.to_string(),
                Some("#analyze".to_string()),
            ),
            forum,
            moderation_model,
            similarity_model,
            notifier,
        }
    }

    #[test]
    fn test_plan_topic_creation() {
        let tasks = plan(&event(1, Some("hello"), Some("T")), NOTICE, Some("#analyze")).unwrap();
        assert_eq!(tasks, vec![TaskKind::Moderation, TaskKind::DuplicateCheck]);
    }

    #[test]
    fn test_plan_reply() {
        let tasks = plan(&event(2, Some("reply text"), None), NOTICE, Some("#analyze")).unwrap();
        assert_eq!(
            tasks,
            vec![
                TaskKind::Moderation,
                TaskKind::Analysis {
                    topic_id: 10,
                    force: false
                }
            ]
        );
    }

    #[test]
    fn test_plan_trigger_token_forces_analysis() {
        let tasks = plan(&event(3, Some("please #analyze this"), None), NOTICE, Some("#analyze")).unwrap();
        assert!(tasks.contains(&TaskKind::Analysis {
            topic_id: 10,
            force: true
        }));

        let tasks = plan(&event(3, Some("please #analyze this"), None), NOTICE, None).unwrap();
        assert!(tasks.contains(&TaskKind::Analysis {
            topic_id: 10,
            force: false
        }));
    }

    #[test]
    fn test_plan_ignores_deleted_and_own_notice() {
        let mut deleted = event(4, Some("hello"), None);
        deleted.deleted_at = Some("2024-01-01T00:00:00Z".to_string());
        assert_eq!(plan(&deleted, NOTICE, None), Err(IgnoreReason::Deleted));

        assert_eq!(
            plan(&event(5, Some(NOTICE), None), NOTICE, None),
            Err(IgnoreReason::OwnNotice)
        );
    }

    #[test]
    fn test_plan_without_content_skips_moderation() {
        let mut post = event(6, None, None);
        post.topic_id = None;
        assert_eq!(plan(&post, NOTICE, None), Ok(Vec::new()));
    }

    #[tokio::test]
    async fn test_ignored_events_make_no_calls() {
        let h = harness(ScriptedModel::replying(["NO spam"]), ScriptedModel::replying(["YES | x | 42"]));

        let mut deleted = event(1, Some("hello"), Some("T"));
        deleted.deleted_at = Some("2024-01-01T00:00:00Z".to_string());
        assert!(matches!(h.dispatcher.dispatch(deleted), Dispatch::Ignored(IgnoreReason::Deleted)));
        assert!(matches!(
            h.dispatcher.dispatch(event(2, Some(NOTICE), None)),
            Dispatch::Ignored(IgnoreReason::OwnNotice)
        ));

        tokio::task::yield_now().await;
        assert_eq!(h.forum.call_count(), 0);
        assert!(h.moderation_model.prompts().is_empty());
        assert!(h.similarity_model.prompts().is_empty());
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_topic_event_runs_moderation_and_duplicate_check() {
        let h = harness(ScriptedModel::replying(["YES fine"]), ScriptedModel::replying(["YES | same | 42"]));

        let Dispatch::Accepted(accepted) = h.dispatcher.dispatch(event(1, Some("hello"), Some("T"))) else {
            panic!("event should be accepted");
        };
        accepted.finished().await;

        assert_eq!(h.moderation_model.prompts().len(), 1);
        assert_eq!(h.similarity_model.prompts().len(), 1);
        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Similar topic detected"));
    }

    #[tokio::test]
    async fn test_new_topic_is_not_compared_with_itself() {
        let h = harness(
            ScriptedModel::replying(["YES fine"]),
            ScriptedModel::responding(|prompt| {
                Ok(if prompt.contains("Topic 10:") {
                    "YES | identical | 10"
                } else {
                    "NO | unrelated | 0"
                }
                .to_string())
            }),
        );

        let Dispatch::Accepted(accepted) =
            h.dispatcher.dispatch(event(1, Some("extend the tram"), Some("Tram line")))
        else {
            panic!("event should be accepted");
        };
        accepted.finished().await;

        let prompts = h.similarity_model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Topic 42: Bike lanes"));
        assert!(!prompts[0].contains("Topic 10:"));
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_reply_below_threshold_only_moderates() {
        let h = harness(ScriptedModel::replying(["YES fine"]), ScriptedModel::replying(Vec::<String>::new()));

        let Dispatch::Accepted(accepted) = h.dispatcher.dispatch(event(2, Some("reply text"), None)) else {
            panic!("event should be accepted");
        };
        accepted.finished().await;

        assert_eq!(h.moderation_model.prompts().len(), 1);
        assert!(h.similarity_model.prompts().is_empty());
        assert!(h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_affect_siblings() {
        let h = harness(
            ScriptedModel::responding(|_| panic!("classifier exploded")),
            ScriptedModel::replying(["YES | same | 42"]),
        );

        let Dispatch::Accepted(accepted) = h.dispatcher.dispatch(event(1, Some("hello"), Some("T"))) else {
            panic!("event should be accepted");
        };
        accepted.finished().await;

        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Similar topic detected"));
    }
}
