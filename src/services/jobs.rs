//! src/services/jobs.rs
//!
//! Background job queue for work that should not block a request, currently
//! auto-summarization after transcription. A bounded mpsc channel feeds a
//! single worker task; failures are logged with the job context and a full
//! queue is reported to the submitter instead of silently dropped.

use crate::services::{
    history_service::HistoryService,
    summarizer::{SummaryEngine, SummaryTemplate},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Transcripts shorter than this are not worth auto-summarizing.
const MIN_CHARS_FOR_AUTO_SUMMARY: usize = 500;

#[derive(Debug, Clone)]
pub enum Job {
    AutoSummarize { history_id: i64, user_id: String },
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Submit without blocking the request path. Returns false when the
    /// queue is saturated; the caller decides whether that matters.
    pub fn submit(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(err) => {
                warn!("job queue rejected submission: {}", err);
                false
            }
        }
    }
}

pub fn spawn_worker(
    history: HistoryService,
    summary: SummaryEngine,
    capacity: usize,
) -> (JobQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Job>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                Job::AutoSummarize {
                    history_id,
                    user_id,
                } => {
                    if let Err(err) =
                        auto_summarize(&history, &summary, history_id, &user_id).await
                    {
                        error!(history_id, "auto-summarization failed: {}", err);
                    }
                }
            }
        }
        info!("job worker shutting down");
    });
    (JobQueue { tx }, handle)
}

async fn auto_summarize(
    history: &HistoryService,
    summary: &SummaryEngine,
    history_id: i64,
    user_id: &str,
) -> anyhow::Result<()> {
    let item = history.get(history_id, user_id).await?;
    if item.summary_text.is_some() {
        return Ok(());
    }
    if item.transcription_text.chars().count() < MIN_CHARS_FOR_AUTO_SUMMARY {
        return Ok(());
    }

    let template = SummaryTemplate::default();
    let text = summary
        .summarize(&item.transcription_text, template)
        .await?;
    history
        .set_summary(history_id, user_id, &text, template.id())
        .await?;
    info!(history_id, "auto-summary stored");
    Ok(())
}
