//! In-memory collaborators for tests.
//!
//! Each fake records what it was asked to do so tests can assert on side
//! effects without a network.

#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::discourse::{CandidateTopic, Category, CreatedPost, Forum, Post, PostStream, Topic};
use crate::llm::LanguageModel;
use crate::notify::NotificationSink;
use crate::summary::{NewComment, Project, ProjectAnalysis, ProjectSummary, StanceDetail, SummaryService};
use crate::vector::{Neighbor, VectorIndex};

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Language model with canned answers.
pub struct ScriptedModel {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    /// Answer with `replies` in order; calls past the end fail.
    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(replies.into_iter().map(Into::into).collect());
        Self::responding(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted reply left"))
        })
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::responding(move |_| Err(anyhow!(message.clone())))
    }

    /// Answer by inspecting the prompt.
    pub fn responding(f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Hold every answer back for `delay`, like a slow upstream.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(prompt)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.answer(prompt).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.answer(prompt).await
    }
}

#[derive(Default)]
struct ForumState {
    categories: Vec<Category>,
    recent: Vec<CandidateTopic>,
    topics: HashMap<i64, Topic>,
    post_counts: HashMap<i64, u64>,
    posts: HashMap<i64, Vec<Post>>,
    requested_topics: Vec<i64>,
    deleted: Vec<i64>,
    replies: Vec<(i64, String)>,
    created_topics: Vec<(String, String, i64)>,
    fail_deletes: bool,
    fail_topics: bool,
    fail_recent: bool,
}

/// In-memory forum.
#[derive(Default)]
pub struct FakeForum {
    state: Mutex<ForumState>,
    calls: AtomicUsize,
}

impl FakeForum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(self, categories: Vec<Category>) -> Self {
        self.state.lock().unwrap().categories = categories;
        self
    }

    pub fn with_recent_topics(self, topics: Vec<CandidateTopic>) -> Self {
        self.state.lock().unwrap().recent = topics;
        self
    }

    /// Register a topic whose first post is `first_post_html`.
    pub fn with_topic(self, id: i64, title: &str, first_post_html: &str) -> Self {
        let topic = Topic {
            id,
            title: title.to_string(),
            posts_count: 1,
            post_stream: PostStream {
                posts: vec![Post {
                    id: id * 100 + 1,
                    post_number: 1,
                    cooked: first_post_html.to_string(),
                    username: None,
                }],
                stream: vec![id * 100 + 1],
            },
        };
        self.state.lock().unwrap().topics.insert(id, topic);
        self
    }

    pub fn with_post_count(self, topic_id: i64, count: u64) -> Self {
        self.state.lock().unwrap().post_counts.insert(topic_id, count);
        self
    }

    pub fn with_posts(self, topic_id: i64, posts: Vec<Post>) -> Self {
        self.state.lock().unwrap().posts.insert(topic_id, posts);
        self
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    pub fn fail_topic_lookups(&self) {
        self.state.lock().unwrap().fail_topics = true;
    }

    pub fn fail_recent_topics(&self) {
        self.state.lock().unwrap().fail_recent = true;
    }

    /// Number of forum calls made, of any kind.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested_topics(&self) -> Vec<i64> {
        self.state.lock().unwrap().requested_topics.clone()
    }

    pub fn deleted_posts(&self) -> Vec<i64> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn replies(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().replies.clone()
    }

    pub fn created_topics(&self) -> Vec<(String, String, i64)> {
        self.state.lock().unwrap().created_topics.clone()
    }

    fn call(&self) -> std::sync::MutexGuard<'_, ForumState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Forum for FakeForum {
    fn base_url(&self) -> &str {
        "https://forum.example.com"
    }

    async fn get_categories(&self) -> Result<Vec<Category>> {
        Ok(self.call().categories.clone())
    }

    async fn create_topic(&self, title: &str, content: &str, category_id: i64) -> Result<CreatedPost> {
        let mut state = self.call();
        state
            .created_topics
            .push((title.to_string(), content.to_string(), category_id));
        let n = state.created_topics.len() as i64;
        Ok(CreatedPost {
            id: 5000 + n,
            topic_id: 500 + n,
            post_number: Some(1),
        })
    }

    async fn delete_post(&self, post_id: i64) -> Result<()> {
        let mut state = self.call();
        if state.fail_deletes {
            return Err(anyhow!("delete refused"));
        }
        state.deleted.push(post_id);
        Ok(())
    }

    async fn create_reply(&self, topic_id: i64, content: &str) -> Result<CreatedPost> {
        let mut state = self.call();
        state.replies.push((topic_id, content.to_string()));
        Ok(CreatedPost {
            id: 9000 + state.replies.len() as i64,
            topic_id,
            post_number: None,
        })
    }

    async fn get_recent_topics(&self, limit: usize) -> Result<Vec<CandidateTopic>> {
        let state = self.call();
        if state.fail_recent {
            return Err(anyhow!("latest.json unavailable"));
        }
        Ok(state.recent.iter().take(limit).cloned().collect())
    }

    async fn get_topic(&self, topic_id: i64) -> Result<Topic> {
        let mut state = self.call();
        state.requested_topics.push(topic_id);
        if state.fail_topics {
            return Err(anyhow!("topic lookup failed"));
        }
        state
            .topics
            .get(&topic_id)
            .cloned()
            .ok_or_else(|| anyhow!("topic {topic_id} not found"))
    }

    async fn get_topic_post_count(&self, topic_id: i64) -> Result<u64> {
        let state = self.call();
        state
            .post_counts
            .get(&topic_id)
            .copied()
            .or_else(|| state.topics.get(&topic_id).map(|t| t.posts_count))
            .ok_or_else(|| anyhow!("topic {topic_id} not found"))
    }

    async fn get_topic_posts(&self, topic_id: i64) -> Result<Vec<Post>> {
        Ok(self.call().posts.get(&topic_id).cloned().unwrap_or_default())
    }
}

/// Notification sink that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Vector index returning fixed neighbours.
pub struct FakeVectorIndex {
    neighbors: Vec<Neighbor>,
    fail: bool,
    embedded: Mutex<Vec<String>>,
    upserted: Mutex<Vec<String>>,
}

impl FakeVectorIndex {
    pub fn with_neighbors(neighbors: Vec<Neighbor>) -> Self {
        Self {
            neighbors,
            fail: false,
            embedded: Mutex::new(Vec::new()),
            upserted: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_neighbors(Vec::new())
        }
    }

    pub fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    pub fn upserted_ids(&self) -> Vec<String> {
        self.upserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(anyhow!("embedding service unavailable"));
        }
        self.embedded.lock().unwrap().push(text.to_string());
        Ok(vec![0.1, 0.2, 0.3])
    }

    async fn upsert(&self, id: &str, _vector: Vec<f32>) -> Result<()> {
        self.upserted.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn nearest(&self, _vector: Vec<f32>, k: usize) -> Result<Vec<Neighbor>> {
        Ok(self.neighbors.iter().take(k).cloned().collect())
    }
}

#[derive(Default)]
struct SummaryState {
    projects: Vec<ProjectSummary>,
    project: Option<Project>,
    stances: HashMap<String, HashMap<String, StanceDetail>>,
    overall_analysis: Option<String>,
    created: Vec<String>,
    imports: Vec<(String, Vec<NewComment>)>,
    generated: Vec<String>,
    analysis_requests: Vec<(String, bool)>,
    fail_generation: bool,
}

/// In-memory summary-project service.
#[derive(Default)]
pub struct FakeSummary {
    state: Mutex<SummaryState>,
}

impl FakeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content returned by `get_project` for every project.
    pub fn with_project(self, project: Project) -> Self {
        self.state.lock().unwrap().project = Some(project);
        self
    }

    pub fn with_stances(self, question_id: &str, stances: HashMap<String, StanceDetail>) -> Self {
        self.state
            .lock()
            .unwrap()
            .stances
            .insert(question_id.to_string(), stances);
        self
    }

    pub fn with_overall_analysis(self, text: &str) -> Self {
        self.state.lock().unwrap().overall_analysis = Some(text.to_string());
        self
    }

    pub fn fail_question_generation(&self) {
        self.state.lock().unwrap().fail_generation = true;
    }

    pub fn created_projects(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn imports(&self) -> Vec<(String, Vec<NewComment>)> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn generated(&self) -> Vec<String> {
        self.state.lock().unwrap().generated.clone()
    }

    pub fn analysis_requests(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().analysis_requests.clone()
    }
}

#[async_trait]
impl SummaryService for FakeSummary {
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        Ok(self.state.lock().unwrap().projects.clone())
    }

    async fn create_project(
        &self,
        name: &str,
        _description: &str,
        _extraction_topic: &str,
    ) -> Result<ProjectSummary> {
        let mut state = self.state.lock().unwrap();
        state.created.push(name.to_string());
        let id = format!("proj-{}", state.created.len());
        // The listing reports `_id`; creation reports `id`.
        state.projects.push(ProjectSummary {
            mongo_id: Some(id.clone()),
            id: None,
            name: name.to_string(),
        });
        Ok(ProjectSummary {
            mongo_id: None,
            id: Some(id),
            name: name.to_string(),
        })
    }

    async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.state
            .lock()
            .unwrap()
            .project
            .clone()
            .ok_or_else(|| anyhow!("project {project_id} not found"))
    }

    async fn bulk_import_comments(&self, project_id: &str, comments: &[NewComment]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .imports
            .push((project_id.to_string(), comments.to_vec()));
        Ok(())
    }

    async fn generate_questions(&self, project_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_generation {
            return Err(anyhow!("question generation failed"));
        }
        state.generated.push(project_id.to_string());
        Ok(())
    }

    async fn get_project_analysis(
        &self,
        project_id: &str,
        force_regenerate: bool,
    ) -> Result<ProjectAnalysis> {
        let mut state = self.state.lock().unwrap();
        state
            .analysis_requests
            .push((project_id.to_string(), force_regenerate));
        Ok(ProjectAnalysis {
            overall_analysis: state.overall_analysis.clone(),
        })
    }

    async fn get_stance_analysis(
        &self,
        _project_id: &str,
        question_id: &str,
    ) -> Result<HashMap<String, StanceDetail>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .stances
            .get(question_id)
            .cloned()
            .unwrap_or_default())
    }
}
