//! Conversation orchestration.
//!
//! Builds the message list sent to the completion service: system prompt,
//! user history, optional live job leads and optional resume text. Job
//! search is a secondary enrichment. When it fails the conversation still
//! goes ahead with a degraded context note in place of the listings.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};

use crate::completion::{ChatMessage, CompletionService, GenerationParams};
use crate::errors::ToolError;
use crate::tools::jobs::{self, SearchJobsArgs};
use crate::tools::{normalize, SessionManager};
use crate::Result;

/// Inbound chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Whether to attach live job leads.
    #[serde(default)]
    pub attach_jobs: bool,
    /// Search query used when `attach_jobs` is set.
    #[serde(default)]
    pub job_query: Option<String>,
    /// Location filter for the search.
    #[serde(default)]
    pub location: Option<String>,
    /// Previously extracted resume text to include as context.
    #[serde(default)]
    pub resume_text: Option<String>,
}

/// Outcome of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    /// Assistant reply.
    pub reply: String,
    /// Normalized job search result, when the search succeeded.
    pub jobs: Option<Value>,
}

/// Outcome of a resume analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeAnalysis {
    /// Text extracted from the uploaded document.
    pub resume_text: String,
    /// Model critique.
    pub analysis: String,
}

/// Drives one chat turn or resume analysis end to end.
pub struct ChatOrchestrator {
    tools: Arc<SessionManager>,
    completion: Arc<dyn CompletionService>,
    system_prompt: String,
    job_limit: u32,
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("tools", &self.tools)
            .field("job_limit", &self.job_limit)
            .finish_non_exhaustive()
    }
}

impl ChatOrchestrator {
    /// Wire the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        tools: Arc<SessionManager>,
        completion: Arc<dyn CompletionService>,
        system_prompt: String,
        job_limit: u32,
    ) -> Self {
        Self {
            tools,
            completion,
            system_prompt,
            job_limit,
        }
    }

    /// Run one chat turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Completion`](crate::AppError::Completion) if the
    /// completion service fails. Job-search failures never surface here.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let (messages, jobs) = self.build_messages(request).await;
        let reply = self
            .completion
            .complete(&messages, &GenerationParams::chat())
            .await?;
        Ok(ChatReply { reply, jobs })
    }

    /// Assemble the message list for `request`.
    ///
    /// Returns the messages and the normalized job result if the search ran
    /// and succeeded.
    pub async fn build_messages(&self, request: &ChatRequest) -> (Vec<ChatMessage>, Option<Value>) {
        let mut messages = Vec::with_capacity(request.messages.len() + 3);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(request.messages.iter().cloned());

        let mut jobs = None;
        let query = request
            .job_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());
        if let (true, Some(query)) = (request.attach_jobs, query) {
            let location = request.location.clone().unwrap_or_default();
            match self.search_jobs(query, &location).await {
                Ok(value) => {
                    messages.push(ChatMessage::system(format!(
                        "Context: Here are live job leads based on query='{query}', \
                         location='{location}'. JSON follows:\n{value}"
                    )));
                    jobs = Some(value);
                }
                Err(err) => messages.push(degraded_jobs_note(&err)),
            }
        }

        if let Some(ref resume) = request.resume_text {
            messages.push(ChatMessage::system(format!(
                "Context: Candidate resume text follows:\n{resume}"
            )));
        }

        (messages, jobs)
    }

    /// Search jobs and normalize the result.
    ///
    /// Call errors that invalidated the session are retried once on a fresh
    /// one. A session that failed to start is not retried in the same turn.
    ///
    /// # Errors
    ///
    /// The [`ToolError`] of the last attempt.
    pub async fn search_jobs(&self, query: &str, location: &str) -> std::result::Result<Value, ToolError> {
        let call = SearchJobsArgs::new(query, location, self.job_limit).to_call()?;
        let span = info_span!("search_jobs", query, location);

        async {
            let result = match self.tools.call(&call).await {
                Err(err) if err.is_retryable() => {
                    warn!(%err, "job search failed, retrying once");
                    self.tools.call(&call).await?
                }
                other => other?,
            };

            let normalized = normalize(result);
            if normalized.is_structured() {
                let value = normalized.into_json();
                match jobs::job_records(&value) {
                    Ok(records) => info!(jobs = records.len(), "job search returned listings"),
                    Err(err) => warn!(%err, "job search returned an unexpected shape"),
                }
                Ok(value)
            } else {
                info!("job search returned unstructured content");
                Ok(normalized.into_json())
            }
        }
        .instrument(span)
        .await
    }

    /// Ask the completion service to critique a resume.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Completion`](crate::AppError::Completion) if the
    /// completion service fails.
    pub async fn analyze_resume(&self, resume_text: String) -> Result<ResumeAnalysis> {
        let messages = [
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(format!(
                "Extract and critique this resume. Return JSON with keys: summary, \
                 strengths[], gaps[], edits[], ats_tips[], extracted_skills[], \
                 extracted_roles[]\n\nRESUME:\n{resume_text}"
            )),
        ];
        let analysis = self
            .completion
            .complete(&messages, &GenerationParams::resume_analysis())
            .await?;
        Ok(ResumeAnalysis {
            resume_text,
            analysis,
        })
    }
}

/// System note telling the model that job data is unavailable this turn.
#[must_use]
pub fn degraded_jobs_note(err: &ToolError) -> ChatMessage {
    warn!(%err, kind = %err.kind(), "job enrichment degraded");
    ChatMessage::system(format!("Context: jobs unavailable ({err}). Continue without."))
}
