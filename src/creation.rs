//! Red-link resolution at the request boundary.
//!
//! [`CreationService::create`] handles one click on `[text](/create/{target})`
//! inside a source page:
//!
//! 1. validate the slugs, then charge the client's rate limit;
//! 2. short-circuit when a job for the pair already exists;
//! 3. locate the red link and cut its context from the source markdown;
//! 4. ask the [`Decider`] for an equivalent page;
//! 5. create the job; only the request that created it schedules a run.
//!
//! The run itself ([`JobRunner`]) is detached from the request: it marks
//! the job running, drives the [`Orchestrator`] under a wall-clock ceiling,
//! settles the terminal status, and finally makes sure the source page no
//! longer carries the red link.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::decider::{Decider, Decision};
use crate::jobs::JobLedger;
use crate::links::{find_red_link, is_valid_slug, link_context, replace_red_link};
use crate::models::{Job, JobStatus, LogEntry, LogLevel, LogPhase, NewLogEntry, PageUpdate};
use crate::orchestrator::{resolve_terminal, DraftMode, DraftSession, Orchestrator, Terminal};
use crate::pages::PageStore;
use crate::ratelimit::RateLimiter;

/// Rate-limit bucket of the create endpoint.
pub const CREATE_ENDPOINT: &str = "create";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub source_slug: String,
    #[serde(default)]
    pub target_slug: String,
}

#[derive(Debug)]
pub struct CreateOutcome {
    /// `/wiki/{slug}` or `/queue/{jobId}`.
    pub redirect: String,
    pub job_id: String,
    /// The background run this request scheduled, if any.
    pub task: Option<JoinHandle<()>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("too many requests, try again later")]
    RateLimited,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct CreationService {
    pages: Arc<PageStore>,
    ledger: Arc<JobLedger>,
    decider: Arc<Decider>,
    limiter: Arc<RateLimiter>,
    runner: JobRunner,
    context_radius: usize,
}

impl CreationService {
    pub fn new(
        pages: Arc<PageStore>,
        ledger: Arc<JobLedger>,
        decider: Arc<Decider>,
        limiter: Arc<RateLimiter>,
        runner: JobRunner,
        context_radius: usize,
    ) -> Self {
        Self {
            pages,
            ledger,
            decider,
            limiter,
            runner,
            context_radius,
        }
    }

    pub async fn create(
        &self,
        request: &CreateRequest,
        client_key: &str,
    ) -> Result<CreateOutcome, CreateError> {
        let source = request.source_slug.trim();
        let target = request.target_slug.trim();
        if !is_valid_slug(source) || !is_valid_slug(target) {
            return Err(CreateError::Validation(
                "sourceSlug and targetSlug must be non-empty slugs".to_string(),
            ));
        }

        if !self.limiter.check_and_record(client_key, CREATE_ENDPOINT).await? {
            tracing::info!(client_key, "create request rate limited");
            return Err(CreateError::RateLimited);
        }

        if let Some(job) = self.ledger.find_by_pair(source, target).await? {
            return Ok(redirect_for_existing(&job.id, job.status, job.result_slug.as_deref()));
        }

        let page = self
            .pages
            .get_page(source)
            .await?
            .ok_or_else(|| CreateError::NotFound(format!("source page not found: {}", source)))?;

        let link = find_red_link(&page.markdown, target)?.ok_or_else(|| {
            CreateError::Validation(format!(
                "source page {} has no red link to {}",
                source, target
            ))
        })?;
        let context = link_context(&page.markdown, &link, self.context_radius);

        let decision = self.decider.decide(&link.text, target, &context).await;

        let handle = self.ledger.get_or_create(source, target).await?;
        if !handle.was_created {
            return Ok(redirect_for_existing(
                &handle.id,
                handle.status,
                handle.result_slug.as_deref(),
            ));
        }

        let (mode, redirect) = match decision {
            Decision::Existing(slug) => {
                let redirect = format!("/wiki/{}", slug);
                (DraftMode::Existing { slug }, redirect)
            }
            Decision::NoMatch => (DraftMode::New, format!("/queue/{}", handle.id)),
        };

        let session = DraftSession {
            source_slug: page.slug,
            source_title: page.title,
            source_markdown: page.markdown,
            target_slug: target.to_string(),
            link_text: link.text,
            context,
            mode,
        };

        tracing::info!(job_id = %handle.id, target, redirect = %redirect, "scheduled creation job");
        let task = self.runner.spawn(handle.id.clone(), session);

        Ok(CreateOutcome {
            redirect,
            job_id: handle.id,
            task: Some(task),
        })
    }

    pub async fn job_with_logs(
        &self,
        job_id: &str,
    ) -> anyhow::Result<Option<(Job, Vec<LogEntry>)>> {
        let Some(job) = self.ledger.get_job(job_id).await? else {
            return Ok(None);
        };
        let logs = self.ledger.logs(job_id).await?;
        Ok(Some((job, logs)))
    }
}

fn redirect_for_existing(job_id: &str, status: JobStatus, result_slug: Option<&str>) -> CreateOutcome {
    let redirect = match (status, result_slug) {
        (JobStatus::Succeeded, Some(slug)) => format!("/wiki/{}", slug),
        _ => format!("/queue/{}", job_id),
    };
    CreateOutcome {
        redirect,
        job_id: job_id.to_string(),
        task: None,
    }
}

/// Runs creation jobs in the background.
#[derive(Clone)]
pub struct JobRunner {
    pages: Arc<PageStore>,
    ledger: Arc<JobLedger>,
    orchestrator: Arc<Orchestrator>,
    max_duration: Duration,
}

impl JobRunner {
    pub fn new(
        pages: Arc<PageStore>,
        ledger: Arc<JobLedger>,
        orchestrator: Arc<Orchestrator>,
        max_duration: Duration,
    ) -> Self {
        Self {
            pages,
            ledger,
            orchestrator,
            max_duration,
        }
    }

    pub fn spawn(&self, job_id: String, session: DraftSession) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(&job_id, &session).await })
    }

    /// Run a queued job to a terminal state. Never returns an error; any
    /// failure ends up on the job.
    pub async fn run(&self, job_id: &str, session: &DraftSession) {
        if let Err(e) = self.try_run(job_id, session).await {
            let message = format!("{:#}", e);
            tracing::error!(job_id, error = %message, "creation job crashed");
            self.log(job_id, LogLevel::Error, LogPhase::Exception, &message)
                .await;
            if let Err(e) = self.ledger.mark_failed(job_id, &message).await {
                tracing::warn!(job_id, error = %e, "failed to mark job failed");
            }
        }
    }

    async fn try_run(&self, job_id: &str, session: &DraftSession) -> anyhow::Result<()> {
        if !self.ledger.mark_running(job_id).await? {
            tracing::warn!(job_id, "job is not queued; skipping run");
            return Ok(());
        }

        let mode = match &session.mode {
            DraftMode::Existing { slug } => format!("existing page {}", slug),
            DraftMode::New => "new page".to_string(),
        };
        self.log(
            job_id,
            LogLevel::Info,
            LogPhase::Start,
            &format!(
                "resolving /create/{} from {} ({})",
                session.target_slug, session.source_slug, mode
            ),
        )
        .await;

        let run = self.orchestrator.run(session, Some(job_id));
        let outcome = match tokio::time::timeout(self.max_duration, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = format!(
                    "run exceeded the {}s wall-clock ceiling",
                    self.max_duration.as_secs()
                );
                self.log(job_id, LogLevel::Error, LogPhase::Exception, &message)
                    .await;
                self.ledger.mark_failed(job_id, &message).await?;
                return Ok(());
            }
        };

        match resolve_terminal(&session.mode, &outcome) {
            Terminal::Succeeded(slug) => {
                self.ledger.mark_succeeded(job_id, &slug).await?;
            }
            Terminal::Failed(message) => {
                self.ledger.mark_failed(job_id, &message).await?;
            }
        }

        self.log(
            job_id,
            LogLevel::Info,
            LogPhase::Background,
            &format!("run ended ({:?}) after {} turn(s)", outcome.end, outcome.turns),
        )
        .await;

        let job = self.ledger.get_job(job_id).await?;
        if let Some(Job {
            status: JobStatus::Succeeded,
            result_slug: Some(result_slug),
            ..
        }) = job
        {
            self.back_patch(job_id, session, &result_slug).await?;
        }
        Ok(())
    }

    /// Rewrite the red link in the source page if the run left it behind.
    async fn back_patch(
        &self,
        job_id: &str,
        session: &DraftSession,
        result_slug: &str,
    ) -> anyhow::Result<()> {
        let Some(source) = self.pages.get_page(&session.source_slug).await? else {
            return Ok(());
        };
        let Some(patched) = replace_red_link(&source.markdown, &session.target_slug, result_slug)?
        else {
            return Ok(());
        };

        self.pages
            .persist_page_update(PageUpdate {
                slug: session.source_slug.clone(),
                markdown: patched,
                summary: None,
            })
            .await?;
        self.log(
            job_id,
            LogLevel::Info,
            LogPhase::Background,
            &format!(
                "back-patched /create/{} to /wiki/{} in {}",
                session.target_slug, result_slug, session.source_slug
            ),
        )
        .await;
        Ok(())
    }

    async fn log(&self, job_id: &str, level: LogLevel, phase: LogPhase, message: &str) {
        let entry = NewLogEntry::new(level, phase, message);
        if let Err(e) = self.ledger.append_log(job_id, &entry).await {
            tracing::warn!(job_id, error = %e, "failed to append creation log");
        }
    }
}
