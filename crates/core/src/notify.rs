use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::sync::Arc;

/// What downstream systems learn when an interview completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSummary {
    pub session_token: String,
    pub interview_id: i64,
    pub user_id: Option<i64>,
    pub position: String,
    pub overall_score: f64,
    pub recommendation: String,
    pub termination_reason: String,
    pub questions_answered: usize,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync {
    async fn interview_completed(&self, summary: &CompletionSummary) -> Result<()>;
}

/// Writes completion summaries to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn interview_completed(&self, summary: &CompletionSummary) -> Result<()> {
        tracing::info!(
            session_token = %summary.session_token,
            interview_id = summary.interview_id,
            score = summary.overall_score,
            recommendation = %summary.recommendation,
            reason = %summary.termination_reason,
            "Interview completed"
        );
        Ok(())
    }
}

/// Delivers the summary on a background task. Failures are logged and never
/// reach the caller.
pub fn notify_in_background(
    notifier: Arc<dyn Notifier>,
    summary: CompletionSummary,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.interview_completed(&summary).await {
            tracing::warn!(session_token = %summary.session_token, "Completion notification failed: {e:#}");
        }
    })
}
