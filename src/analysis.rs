//! Threshold-triggered discussion analysis.
//!
//! When a topic's post count reaches a multiple of the configured threshold
//! (or a reply carries the trigger token) its posts are imported into a
//! summary project, the most debated question is picked by the language
//! model, and a facilitation post embedding the question's visualisation is
//! written. Outside dry-run the post is published as a reply.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::constants::SUMMARY_EXTRACTION_TOPIC;
use crate::discourse::{topic_url, Forum};
use crate::llm::{generate_structured, LanguageModel};
use crate::notify::NotificationSink;
use crate::summary::{NewComment, Project, Question, SummaryService};
use crate::text::html_to_text;
use crate::verdict::within;

/// Whether a topic with `post_count` posts is due for analysis.
#[must_use]
pub fn should_trigger(post_count: u64, threshold: u64, force: bool) -> bool {
    force || (threshold > 0 && post_count > 0 && post_count % threshold == 0)
}

/// Summary project name for a topic. Lookups by this name keep creation idempotent.
#[must_use]
pub fn project_name(topic_id: i64) -> String {
    format!("topic_{topic_id}")
}

/// Embed tag for one question's stance visualisation.
#[must_use]
pub fn embed_iframe(embed_base_url: &str, project_id: &str, question_id: &str) -> String {
    format!(
        r#"<iframe src="{}/embed/{project_id}?question={question_id}" width="100%" height="500px"></iframe>"#,
        embed_base_url.trim_end_matches('/')
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    NotDue { post_count: u64 },
    /// Analysis published as a reply.
    Posted { project_id: String },
    /// Analysis computed and reported to the operators only.
    DryRun { project_id: String },
    Failed,
}

/// A stance together with the comments the summary service attributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StanceComments {
    name: String,
    comments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Ranking {
    ranking: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostText {
    post_text: String,
}

#[derive(Clone)]
pub struct AnalysisScheduler {
    forum: Arc<dyn Forum>,
    summary: Arc<dyn SummaryService>,
    model: Arc<dyn LanguageModel>,
    notifier: Arc<dyn NotificationSink>,
    threshold: u64,
    dry_run: bool,
    embed_base_url: String,
    call_timeout: Duration,
}

impl AnalysisScheduler {
    #[must_use]
    pub fn new(
        forum: Arc<dyn Forum>,
        summary: Arc<dyn SummaryService>,
        model: Arc<dyn LanguageModel>,
        notifier: Arc<dyn NotificationSink>,
        threshold: u64,
        dry_run: bool,
        embed_base_url: String,
        call_timeout: Duration,
    ) -> Self {
        Self {
            forum,
            summary,
            model,
            notifier,
            threshold,
            dry_run,
            embed_base_url,
            call_timeout,
        }
    }

    /// Analyse the topic if it is due. Failures are reported, never returned.
    pub async fn maybe_trigger_analysis(&self, topic_id: i64, force: bool) -> AnalysisOutcome {
        match self.run(topic_id, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(topic_id, "Topic analysis failed: {e:#}");
                self.notifier
                    .send(&format!("Topic {topic_id} analysis failed: {e:#}"))
                    .await;
                AnalysisOutcome::Failed
            }
        }
    }

    async fn run(&self, topic_id: i64, force: bool) -> Result<AnalysisOutcome> {
        let post_count = within(
            self.call_timeout,
            "Post count",
            self.forum.get_topic_post_count(topic_id),
        )
        .await?;
        info!(topic_id, post_count, threshold = self.threshold, force, "Checked topic post count");

        if !should_trigger(post_count, self.threshold, force) {
            return Ok(AnalysisOutcome::NotDue { post_count });
        }

        let (project_id, overall) = self.analyze_topic(topic_id).await?;
        let content = self.compose_post(&project_id).await?;

        let report = format!(
            "Topic {topic_id} analysis complete\nProject ID: {project_id}\nOverall analysis: {overall}\nPost content: {content}\nPost count: {post_count}"
        );

        // Only publishing is gated; everything above also runs in dry-run.
        if self.dry_run {
            self.notifier.send(&format!("[dry run] {report}")).await;
            return Ok(AnalysisOutcome::DryRun { project_id });
        }

        within(
            self.call_timeout,
            "Analysis reply",
            self.forum.create_reply(topic_id, &content),
        )
        .await?;
        self.notifier.send(&report).await;
        info!(topic_id, project_id = %project_id, "Published topic analysis");
        Ok(AnalysisOutcome::Posted { project_id })
    }

    /// Find the topic's project by name, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary service fails or returns a project without an id.
    pub async fn create_or_get_project(&self, topic_id: i64, title: &str) -> Result<String> {
        let name = project_name(topic_id);
        let projects = within(self.call_timeout, "List projects", self.summary.list_projects())
            .await
            .context("Failed to list summary projects")?;

        if let Some(id) = projects
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.project_id())
        {
            debug!(topic_id, project_id = id, "Reusing summary project");
            return Ok(id.to_string());
        }

        let created = within(
            self.call_timeout,
            "Create project",
            self.summary
                .create_project(&name, title, SUMMARY_EXTRACTION_TOPIC),
        )
        .await
        .context("Failed to create summary project")?;
        let id = created
            .project_id()
            .with_context(|| format!("Summary project {name} was created without an id"))?;
        info!(topic_id, project_id = id, "Created summary project");
        Ok(id.to_string())
    }

    async fn import_posts(&self, project_id: &str, topic_id: i64) -> Result<usize> {
        let posts = within(self.call_timeout, "Topic posts", self.forum.get_topic_posts(topic_id))
            .await
            .context("Failed to fetch topic posts")?;

        let base_url = self.forum.base_url();
        let comments: Vec<NewComment> = posts
            .iter()
            .map(|post| NewComment {
                content: html_to_text(&post.cooked),
                source_type: "other".to_string(),
                source_url: topic_url(base_url, topic_id, Some(post.post_number)),
            })
            .collect();

        within(
            self.call_timeout,
            "Import comments",
            self.summary.bulk_import_comments(project_id, &comments),
        )
        .await
        .context("Failed to import posts into summary project")?;
        Ok(comments.len())
    }

    /// Returns the project id and the service's overall analysis.
    async fn analyze_topic(&self, topic_id: i64) -> Result<(String, String)> {
        let topic = within(self.call_timeout, "Topic lookup", self.forum.get_topic(topic_id)).await?;
        let project_id = self.create_or_get_project(topic_id, &topic.title).await?;

        let imported = self.import_posts(&project_id, topic_id).await?;
        debug!(topic_id, imported, "Imported posts into summary project");

        within(
            self.call_timeout,
            "Generate questions",
            self.summary.generate_questions(&project_id),
        )
        .await
        .context("Failed to generate questions")?;

        let analysis = within(
            self.call_timeout,
            "Project analysis",
            self.summary.get_project_analysis(&project_id, true),
        )
        .await
        .context("Failed to analyse summary project")?;

        let overall = analysis
            .overall_analysis
            .unwrap_or_else(|| "No overall analysis available".to_string());
        Ok((project_id, overall))
    }

    /// Write the facilitation post for the project's most debated question.
    async fn compose_post(&self, project_id: &str) -> Result<String> {
        let project = within(self.call_timeout, "Project lookup", self.summary.get_project(project_id)).await?;
        if project.questions.is_empty() {
            bail!("Summary project {project_id} has no questions");
        }

        let mut stances = Vec::with_capacity(project.questions.len());
        for question in &project.questions {
            stances.push(self.stance_comments(project_id, question).await?);
        }

        let ranking: Ranking = within(
            self.call_timeout,
            "Ranking call",
            generate_structured(self.model.as_ref(), &build_ranking_prompt(&project, &stances)),
        )
        .await
        .context("Failed to rank questions")?;
        debug!(ranking = ?ranking.ranking, reason = ?ranking.reason, "Questions ranked");

        let index = pick_question(&ranking.ranking, &project.questions)
            .context("Ranking named no known question")?;
        let question = &project.questions[index];
        let iframe = embed_iframe(&self.embed_base_url, project_id, &question.id);

        let post: PostText = within(
            self.call_timeout,
            "Post text call",
            generate_structured(
                self.model.as_ref(),
                &build_post_prompt(&project, question, &stances[index], &iframe),
            ),
        )
        .await
        .context("Failed to write analysis post")?;
        Ok(post.post_text)
    }

    async fn stance_comments(&self, project_id: &str, question: &Question) -> Result<Vec<StanceComments>> {
        let mut analysis = within(
            self.call_timeout,
            "Stance analysis",
            self.summary.get_stance_analysis(project_id, &question.id),
        )
        .await
        .with_context(|| format!("Failed to fetch stance analysis for question {}", question.id))?;

        Ok(question
            .stances
            .iter()
            .map(|stance| StanceComments {
                name: stance.name.clone(),
                comments: analysis
                    .remove(&stance.id)
                    .map(|detail| detail.comments)
                    .unwrap_or_default(),
            })
            .collect())
    }
}

/// Index of the first ranked id that names one of `questions`.
fn pick_question(ranking: &[String], questions: &[Question]) -> Option<usize> {
    ranking
        .iter()
        .find_map(|id| questions.iter().position(|q| &q.id == id))
}

fn describe_stances(stances: &[StanceComments]) -> String {
    let mut out = String::new();
    for stance in stances {
        out.push_str(&format!("Stance: {}\nComments:\n", stance.name));
        for comment in &stance.comments {
            out.push_str(&format!("- {comment}\n"));
        }
    }
    out
}

fn build_ranking_prompt(project: &Project, stances: &[Vec<StanceComments>]) -> String {
    let questions = project
        .questions
        .iter()
        .zip(stances)
        .map(|(q, s)| {
            format!(
                "### Question\n{}\n(question_id: {})\n\n### Stances\n{}",
                q.text,
                q.id,
                describe_stances(s)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You facilitate a forum for constructive political discussion.\n\
         Several questions were extracted automatically from the topic \"{}\".\n\
         Rank them by how much lively discussion each is likely to produce, considering:\n\
         1. whether the stances involve real trade-offs\n\
         2. whether the question is concrete without being too narrow\n\n\
         Answer with JSON only, in this shape:\n\
         {{\"ranking\": [\"question_id\", ...], \"reason\": \"why this order\"}}\n\n\
         ## Questions\n{questions}",
        project.name
    )
}

fn build_post_prompt(
    project: &Project,
    question: &Question,
    stances: &[StanceComments],
    iframe: &str,
) -> String {
    format!(
        "You facilitate a forum for constructive political discussion.\n\
         In the topic \"{}\" one question is drawing especially varied opinions.\n\
         Summarise the discussion of that question so far and write a new post inviting further comments.\n\n\
         Guidelines:\n\
         - Make the trade-offs between stances explicit; if there are few, frame a limited-resources choice.\n\
         - Do not reduce the question to two camps; welcome other viewpoints.\n\
         - Make it easy for newcomers to join the discussion.\n\
         - Place this embed right after the opening sentence, unchanged: {iframe}\n\n\
         Answer with JSON only, in this shape:\n\
         {{\"post_text\": \"markdown text ready to post\"}}\n\n\
         # Question\n{}\n\n## Stances and comments\n{}",
        project.name,
        question.text,
        describe_stances(stances)
    )
}
