//! Client for the discussion summary-project service.
//!
//! A project collects a topic's posts as comments; the service extracts
//! open questions from them and analyses the stances taken on each.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::constants::BOT_USER_AGENT;

/// Entry of the project listing.
///
/// The listing returns database ids as `_id` while creation returns `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub mongo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

impl ProjectSummary {
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.mongo_id.as_deref())
    }
}

/// Full project with its generated questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// An open question extracted from the discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub stances: Vec<Stance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stance {
    pub id: String,
    pub name: String,
}

/// Per-stance detail from the stance analysis report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanceDetail {
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StanceAnalysisResponse {
    #[serde(default)]
    stance_analysis: HashMap<String, StanceDetail>,
}

/// Whole-project analysis report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    #[serde(default)]
    pub overall_analysis: Option<String>,
}

/// A forum post imported as a project comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub content: String,
    pub source_type: String,
    pub source_url: String,
}

/// Summary-project operations the analysis workflow depends on.
#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>>;

    async fn create_project(
        &self,
        name: &str,
        description: &str,
        extraction_topic: &str,
    ) -> Result<ProjectSummary>;

    async fn get_project(&self, project_id: &str) -> Result<Project>;

    async fn bulk_import_comments(&self, project_id: &str, comments: &[NewComment]) -> Result<()>;

    async fn generate_questions(&self, project_id: &str) -> Result<()>;

    async fn get_project_analysis(
        &self,
        project_id: &str,
        force_regenerate: bool,
    ) -> Result<ProjectAnalysis>;

    /// Stance id to detail, for one question.
    async fn get_stance_analysis(
        &self,
        project_id: &str,
        question_id: &str,
    ) -> Result<HashMap<String, StanceDetail>>;
}

/// HTTP client for the summary-project API.
#[derive(Clone)]
pub struct SummaryClient {
    http: reqwest::Client,
    base_url: String,
    admin_api_key: String,
}

impl SummaryClient {
    /// Create a new summary client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.external_call_timeout)
            .user_agent(BOT_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.summary_base_url.clone(),
            admin_api_key: config.summary_api_key.clone(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, path: &str) -> Result<reqwest::Response> {
        debug!(path = %path, "Summary service request");

        let response = request
            .header("x-api-key", &self.admin_api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send request to summary service {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            anyhow::bail!("Summary service {path} failed: {status} - {body}");
        }

        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, path: &str) -> Result<T> {
        self.send(request, path)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse summary service {path} response"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl SummaryService for SummaryClient {
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let path = "/projects";
        self.json(self.http.get(self.url(path)), path).await
    }

    async fn create_project(
        &self,
        name: &str,
        description: &str,
        extraction_topic: &str,
    ) -> Result<ProjectSummary> {
        let path = "/projects";
        let request = self.http.post(self.url(path)).json(&json!({
            "name": name,
            "description": description,
            "extractionTopic": extraction_topic,
        }));
        self.json(request, path).await
    }

    async fn get_project(&self, project_id: &str) -> Result<Project> {
        let path = format!("/projects/{}", urlencoding::encode(project_id));
        self.json(self.http.get(self.url(&path)), &path).await
    }

    async fn bulk_import_comments(&self, project_id: &str, comments: &[NewComment]) -> Result<()> {
        let path = format!("/projects/{}/comments/bulk", urlencoding::encode(project_id));
        let request = self
            .http
            .post(self.url(&path))
            .json(&json!({ "comments": comments }));
        self.send(request, &path).await?;
        Ok(())
    }

    async fn generate_questions(&self, project_id: &str) -> Result<()> {
        let path = format!("/projects/{}/generate-questions", urlencoding::encode(project_id));
        self.send(self.http.post(self.url(&path)), &path).await?;
        Ok(())
    }

    async fn get_project_analysis(
        &self,
        project_id: &str,
        force_regenerate: bool,
    ) -> Result<ProjectAnalysis> {
        let path = format!("/projects/{}/analysis", urlencoding::encode(project_id));
        let request = self
            .http
            .get(self.url(&path))
            .query(&[("forceRegenerate", force_regenerate.to_string())]);
        self.json(request, &path).await
    }

    async fn get_stance_analysis(
        &self,
        project_id: &str,
        question_id: &str,
    ) -> Result<HashMap<String, StanceDetail>> {
        let path = format!(
            "/projects/{}/questions/{}/stance-analysis",
            urlencoding::encode(project_id),
            urlencoding::encode(question_id)
        );
        let request = self
            .http
            .get(self.url(&path))
            .query(&[("forceRegenerate", "false")]);
        let response: StanceAnalysisResponse = self.json(request, &path).await?;
        Ok(response.stance_analysis)
    }
}

impl std::fmt::Debug for SummaryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
