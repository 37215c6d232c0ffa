use crate::InterviewEvent;
use crate::archive::MediaArchive;
use crate::assessment::{
    FinalAssessment, InterviewInsights, InterviewReport, SessionAnalysis, session_analysis,
};
use crate::audio::AudioPayload;
use crate::error::{WorkflowError, WorkflowResult};
use crate::notify::{CompletionSummary, Notifier, notify_in_background};
use crate::repository::{InterviewDefinition, InterviewRepository};
use crate::session_state::{
    Evaluation, InterviewStatus, Question, ResponseRecord, SessionState, Stage, TerminationReason,
    TurnInput,
};
use crate::stages;
use crate::store::{SessionLocks, SessionStore};
use crate::workflow::{InterviewWorkflow, PipelineRun};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session_token: String,
    pub first_question: Question,
    pub question_audio: Option<Vec<u8>>,
    /// True when the interview already had a live session and that one was returned.
    pub is_resumed: bool,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub evaluation: Option<Evaluation>,
    /// What the candidate said, when the turn was answered by audio.
    pub transcript: Option<String>,
    pub next_question: Option<Question>,
    pub follow_up: Option<Question>,
    pub is_completed: bool,
    pub termination_reason: Option<TerminationReason>,
    pub warning: Option<String>,
    pub notice: Option<String>,
    pub encouragement: Option<String>,
    pub current_score: f64,
    pub question_audio: Option<Vec<u8>>,
    pub event: Option<InterviewEvent>,
}

#[derive(Debug, Clone)]
pub struct PresentedQuestion {
    pub text: String,
    pub question: Question,
    pub audio: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_token: String,
    pub status: InterviewStatus,
    pub current_step: Stage,
    pub should_continue: bool,
    pub is_active: bool,
    pub questions_answered: usize,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub current_score: f64,
    pub current_question: Option<Question>,
    pub recovered: bool,
}

/// Outcome of re-checking a session's prerequisites. Nothing is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionValidation {
    pub session_token: String,
    pub is_valid: bool,
    pub prerequisites_met: bool,
    pub current_step: Stage,
    pub error_message: Option<String>,
    pub session_valid: bool,
    pub questions_available: usize,
    pub user_authenticated: bool,
    pub interview_configured: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterviewResults {
    pub session_token: String,
    pub termination_reason: Option<TerminationReason>,
    pub final_assessment: FinalAssessment,
    pub interview_report: Option<InterviewReport>,
    pub interview_insights: Option<InterviewInsights>,
    pub responses_history: Vec<ResponseRecord>,
}

/// Caller-facing operations over the workflow engine.
///
/// Every operation loads the session, runs at most one engine invocation on
/// a working copy, and commits the result. Operations on the same session
/// are serialized through [`SessionLocks`].
pub struct InterviewService {
    workflow: Arc<InterviewWorkflow>,
    sessions: Arc<dyn SessionStore>,
    interviews: Arc<dyn InterviewRepository>,
    locks: SessionLocks,
    notifier: Option<Arc<dyn Notifier>>,
    archive: Option<Arc<dyn MediaArchive>>,
}

impl InterviewService {
    pub fn new(
        workflow: Arc<InterviewWorkflow>,
        sessions: Arc<dyn SessionStore>,
        interviews: Arc<dyn InterviewRepository>,
    ) -> Self {
        Self {
            workflow,
            sessions,
            interviews,
            locks: SessionLocks::new(),
            notifier: None,
            archive: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn MediaArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub async fn start(&self, interview_id: i64, user_id: i64) -> WorkflowResult<StartOutcome> {
        let span = tracing::info_span!("start", interview_id, user_id);
        reported("start", self.start_inner(interview_id, user_id).instrument(span).await)
    }

    async fn start_inner(&self, interview_id: i64, user_id: i64) -> WorkflowResult<StartOutcome> {
        let _guard = self.locks.acquire(&format!("interview:{interview_id}")).await;

        let interview = self
            .interviews
            .get(interview_id)
            .await
            .map_err(WorkflowError::store)?
            .filter(|i| i.user_id == user_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Interview {interview_id} not found")))?;

        if let Some(existing) = self
            .sessions
            .find_active(interview_id)
            .await
            .map_err(WorkflowError::store)?
        {
            return self.rejoin(existing).await;
        }

        if interview.status != InterviewStatus::Created {
            return Err(WorkflowError::InvalidState(format!(
                "Interview {interview_id} is {} and cannot be started",
                interview.status
            )));
        }

        let session_token = Uuid::new_v4().to_string();
        let max_duration = if interview.max_duration_minutes == 0 {
            self.workflow.policy().default_max_duration_minutes
        } else {
            interview.max_duration_minutes
        };
        let state = SessionState::new(
            &session_token,
            interview_id,
            Some(user_id),
            &interview.position,
            interview.interview_type,
            interview.difficulty,
            max_duration,
        );

        let run = self.timed(&session_token, self.workflow.start(state)).await?;
        // A session that never reached its first question is not kept, so
        // the interview can be started again once the cause is fixed.
        if let Some(err) = run.halted {
            return Err(err);
        }
        let state = run.state;
        let first_question = state.current_question.clone().ok_or_else(|| {
            WorkflowError::InvalidState("Session started without a question".to_string())
        })?;
        self.save(&state).await?;
        self.update_interview(&interview, InterviewStatus::InProgress).await;

        tracing::info!(
            session_token = %session_token,
            questions = state.questions_generated.len(),
            "Interview session started"
        );
        Ok(StartOutcome {
            session_token,
            first_question,
            question_audio: state.question_audio,
            is_resumed: false,
        })
    }

    /// Hands back a live session for an interview that was started before.
    async fn rejoin(&self, existing: SessionState) -> WorkflowResult<StartOutcome> {
        let _session = self.locks.acquire(&session_key(&existing.session_token)).await;
        let mut state = self.load(&existing.session_token).await?;
        let first_question = state.current_question.clone().ok_or_else(|| {
            WorkflowError::InvalidState(format!(
                "Session {} has no question to resume",
                state.session_token
            ))
        })?;
        if state.status == InterviewStatus::Paused {
            state.status = InterviewStatus::InProgress;
            state.last_activity_at = Some(Utc::now());
            self.save(&state).await?;
            self.set_interview_status(state.interview_id, InterviewStatus::InProgress)
                .await;
        }
        tracing::info!(session_token = %state.session_token, "Rejoined existing session");
        let question_audio = self.workflow.synthesize(&first_question.question).await;
        Ok(StartOutcome {
            session_token: state.session_token,
            first_question,
            question_audio,
            is_resumed: true,
        })
    }

    pub async fn submit_response(
        &self,
        session_token: &str,
        text: Option<String>,
        audio: Option<AudioPayload>,
    ) -> WorkflowResult<SubmitOutcome> {
        let span = tracing::info_span!("submit_response", session_token);
        let input = TurnInput {
            text,
            audio,
            timed_out: false,
        };
        reported(
            "submit_response",
            self.turn(session_token, input).instrument(span).await,
        )
    }

    /// The candidate did not answer in time: the question is skipped and
    /// nothing is recorded.
    pub async fn report_timeout(&self, session_token: &str) -> WorkflowResult<SubmitOutcome> {
        let span = tracing::info_span!("report_timeout", session_token);
        reported(
            "report_timeout",
            self.turn(session_token, TurnInput::timed_out())
                .instrument(span)
                .await,
        )
    }

    async fn turn(&self, session_token: &str, input: TurnInput) -> WorkflowResult<SubmitOutcome> {
        let _guard = self.locks.acquire(&session_key(session_token)).await;
        let state = self.load(session_token).await?;
        ensure_accepting(&state)?;

        let answered_by_audio = input.audio.is_some();
        let recorded = state.responses_history.len();

        let run = self
            .timed(session_token, self.workflow.process_response(state, input))
            .await?;
        let PipelineRun {
            mut state, halted, ..
        } = run;
        match halted {
            // A rejected answer leaves the stored session exactly as it was.
            Some(err @ WorkflowError::Validation(_)) => return Err(err),
            Some(err) => {
                self.save(&state).await?;
                return Err(err);
            }
            None => {}
        }

        self.archive_recording(&mut state, recorded).await;
        self.save(&state).await?;
        if !state.should_continue {
            self.record_completion(&state).await;
        }
        Ok(submit_outcome(state, answered_by_audio))
    }

    pub async fn get_status(&self, session_token: &str) -> WorkflowResult<SessionStatus> {
        let state = reported("get_status", self.load(session_token).await)?;
        Ok(SessionStatus {
            session_token: state.session_token.clone(),
            status: state.status,
            current_step: state.current_step,
            should_continue: state.should_continue,
            is_active: state.is_active,
            questions_answered: state.questions_answered(),
            current_question_index: state.current_question_index,
            total_questions: state.questions_generated.len(),
            current_score: state.current_average_score,
            current_question: state.current_question,
            recovered: state.recovered,
        })
    }

    /// Performance so far: score bands, trend, delivery and emotion per turn.
    pub async fn analysis(&self, session_token: &str) -> WorkflowResult<SessionAnalysis> {
        let state = reported("analysis", self.load(session_token).await)?;
        Ok(session_analysis(&state))
    }

    /// Re-runs the session and prerequisite checks against the stored session.
    pub async fn validate(&self, session_token: &str) -> WorkflowResult<SessionValidation> {
        reported("validate", self.validate_inner(session_token).await)
    }

    async fn validate_inner(&self, session_token: &str) -> WorkflowResult<SessionValidation> {
        let state = self.load(session_token).await?;
        if !state.is_active {
            return Err(WorkflowError::Inactive {
                token: session_token.to_string(),
                status: state.status,
            });
        }

        let mut checked = state.clone();
        checked.should_continue = true;
        checked.error_message = None;
        let checked = stages::validate_session(checked);
        let session_valid = checked.should_continue;
        let checked = stages::check_prerequisites(checked);
        let prerequisites_met = checked.should_continue;
        let is_valid = session_valid && prerequisites_met;

        Ok(SessionValidation {
            session_token: state.session_token,
            is_valid,
            prerequisites_met,
            current_step: state.current_step,
            error_message: if is_valid { None } else { checked.error_message },
            session_valid,
            questions_available: state.questions_generated.len(),
            user_authenticated: state.user_id.is_some(),
            interview_configured: !state.position.trim().is_empty(),
        })
    }

    pub async fn pause(&self, session_token: &str) -> WorkflowResult<()> {
        let span = tracing::info_span!("pause", session_token);
        reported("pause", self.pause_inner(session_token).instrument(span).await)
    }

    async fn pause_inner(&self, session_token: &str) -> WorkflowResult<()> {
        let _guard = self.locks.acquire(&session_key(session_token)).await;
        let mut state = self.load(session_token).await?;
        if state.status != InterviewStatus::InProgress || !state.should_continue {
            return Err(WorkflowError::InvalidState(format!(
                "Session is {} and cannot be paused",
                state.status
            )));
        }
        state.status = InterviewStatus::Paused;
        state.last_activity_at = Some(Utc::now());
        self.save(&state).await?;
        self.set_interview_status(state.interview_id, InterviewStatus::Paused)
            .await;
        tracing::info!("Session paused");
        Ok(())
    }

    /// Resumes a paused session and returns the question it was waiting on.
    pub async fn resume(&self, session_token: &str) -> WorkflowResult<PresentedQuestion> {
        let span = tracing::info_span!("resume", session_token);
        reported("resume", self.resume_inner(session_token).instrument(span).await)
    }

    async fn resume_inner(&self, session_token: &str) -> WorkflowResult<PresentedQuestion> {
        let _guard = self.locks.acquire(&session_key(session_token)).await;
        let mut state = self.load(session_token).await?;
        if state.status != InterviewStatus::Paused {
            return Err(WorkflowError::InvalidState(format!(
                "Session is {} and cannot be resumed",
                state.status
            )));
        }
        let question = state.current_question.clone().ok_or_else(|| {
            WorkflowError::InvalidState("Paused session has no current question".to_string())
        })?;
        state.status = InterviewStatus::InProgress;
        state.last_activity_at = Some(Utc::now());
        self.save(&state).await?;
        self.set_interview_status(state.interview_id, InterviewStatus::InProgress)
            .await;
        tracing::info!("Session resumed");

        let audio = self.workflow.synthesize(&question.question).await;
        Ok(PresentedQuestion {
            text: question.question.clone(),
            question,
            audio,
        })
    }

    /// Stops the session at the candidate's request. The assessment is still
    /// built from whatever was answered.
    pub async fn cancel(&self, session_token: &str, reason: &str) -> WorkflowResult<SessionStatus> {
        let span = tracing::info_span!("cancel", session_token);
        let result = self
            .conclude(
                session_token,
                TerminationReason::Cancelled(reason.to_string()),
                None,
            )
            .instrument(span)
            .await;
        reported("cancel", result)?;
        self.get_status(session_token).await
    }

    /// Ends the session on the interviewer's decision, optionally recording
    /// their feedback in the report.
    pub async fn force_terminate(
        &self,
        session_token: &str,
        reason: &str,
        feedback: Option<String>,
    ) -> WorkflowResult<InterviewResults> {
        let span = tracing::info_span!("force_terminate", session_token);
        let result = self
            .conclude(
                session_token,
                TerminationReason::ManualTermination(reason.to_string()),
                feedback,
            )
            .instrument(span)
            .await;
        reported("force_terminate", result)?;
        self.get_results(session_token).await
    }

    async fn conclude(
        &self,
        session_token: &str,
        reason: TerminationReason,
        feedback: Option<String>,
    ) -> WorkflowResult<()> {
        let _guard = self.locks.acquire(&session_key(session_token)).await;
        let mut state = self.load(session_token).await?;
        if state.status.is_terminal() {
            return Err(WorkflowError::InvalidState(format!(
                "Session is already {}",
                state.status
            )));
        }
        if matches!(reason, TerminationReason::Cancelled(_)) {
            state.status = InterviewStatus::Cancelled;
        }
        if feedback.is_some() {
            state.manual_feedback = feedback;
        }

        let run = self
            .timed(session_token, self.workflow.conclude(state, reason))
            .await?;
        self.save(&run.state).await?;
        self.record_completion(&run.state).await;
        Ok(())
    }

    pub async fn get_results(&self, session_token: &str) -> WorkflowResult<InterviewResults> {
        reported("get_results", self.results_inner(session_token).await)
    }

    async fn results_inner(&self, session_token: &str) -> WorkflowResult<InterviewResults> {
        let state = self.load(session_token).await?;
        if state.status != InterviewStatus::Completed {
            return Err(WorkflowError::NotCompleted(format!(
                "Session is {}; results are available once it completes",
                state.status
            )));
        }
        Ok(InterviewResults {
            session_token: state.session_token,
            termination_reason: state.termination_reason,
            final_assessment: state.final_assessment.unwrap_or_default(),
            interview_report: state.interview_report,
            interview_insights: state.interview_insights,
            responses_history: state.responses_history,
        })
    }

    pub async fn rephrase_question(&self, session_token: &str) -> WorkflowResult<PresentedQuestion> {
        reported("rephrase_question", self.rephrase_inner(session_token).await)
    }

    async fn rephrase_inner(&self, session_token: &str) -> WorkflowResult<PresentedQuestion> {
        let state = self.load(session_token).await?;
        if state.status.is_terminal() || !state.should_continue {
            return Err(WorkflowError::Inactive {
                token: session_token.to_string(),
                status: state.status,
            });
        }
        let question = state.current_question.ok_or_else(|| {
            WorkflowError::InvalidState("No question is currently being asked".to_string())
        })?;
        let text = format!("Let me rephrase: {}", question.question);
        let audio = self.workflow.synthesize(&text).await;
        Ok(PresentedQuestion {
            text,
            question,
            audio,
        })
    }

    async fn load(&self, session_token: &str) -> WorkflowResult<SessionState> {
        let state = self
            .sessions
            .load(session_token)
            .await
            .map_err(WorkflowError::store)?
            .ok_or_else(|| WorkflowError::NotFound(format!("Session {session_token} not found")))?;
        if state.recovered {
            let err = WorkflowError::StateCorruption {
                token: session_token.to_string(),
                detail: state.error_message.clone().unwrap_or_default(),
            };
            tracing::warn!("{err}");
        }
        Ok(state)
    }

    async fn save(&self, state: &SessionState) -> WorkflowResult<()> {
        self.sessions
            .save(&state.session_token, state)
            .await
            .map_err(WorkflowError::store)
    }

    /// Keeps the turn's recording once the engine has accepted the answer and
    /// links it from the records the turn appended.
    async fn archive_recording(&self, state: &mut SessionState, recorded: usize) {
        let (Some(archive), Some(audio)) = (&self.archive, state.audio_payload.as_ref()) else {
            return;
        };
        if state.responses_history.len() <= recorded {
            return;
        }
        match archive
            .store_audio(&state.session_token, &audio.bytes, audio.format)
            .await
        {
            Ok(reference) => {
                for record in &mut state.responses_history[recorded..] {
                    if record.has_audio {
                        record.audio_reference = Some(reference.clone());
                    }
                }
            }
            Err(e) => tracing::warn!("Audio archival failed, continuing without it: {e:#}"),
        }
    }

    async fn timed<F>(&self, session_token: &str, run: F) -> WorkflowResult<PipelineRun>
    where
        F: Future<Output = WorkflowResult<PipelineRun>>,
    {
        let limit = self.workflow.policy().turn_timeout();
        match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::TimedOut(format!(
                "Session {session_token} did not finish within {}s",
                limit.as_secs()
            ))),
        }
    }

    /// Pushes the final outcome to the interview record and notifies
    /// downstream systems. Neither failure affects the committed session.
    async fn record_completion(&self, state: &SessionState) {
        let assessment = state.final_assessment.clone().unwrap_or_default();
        let reason = state
            .termination_reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        tracing::info!(
            session_token = %state.session_token,
            score = assessment.overall_score,
            %reason,
            "Interview finished"
        );

        match self.interviews.get(state.interview_id).await {
            Ok(Some(interview)) => {
                let mut interview = interview;
                interview.score = Some(assessment.overall_score);
                if state.manual_feedback.is_some() {
                    interview.feedback = state.manual_feedback.clone();
                }
                self.update_interview(&interview, state.status).await;
            }
            Ok(None) => tracing::warn!(
                interview_id = state.interview_id,
                "Completed session has no interview record"
            ),
            Err(e) => tracing::warn!("Failed to load interview record: {e:#}"),
        }

        if let Some(notifier) = &self.notifier {
            notify_in_background(
                notifier.clone(),
                CompletionSummary {
                    session_token: state.session_token.clone(),
                    interview_id: state.interview_id,
                    user_id: state.user_id,
                    position: state.position.clone(),
                    overall_score: assessment.overall_score,
                    recommendation: assessment.recommendation,
                    termination_reason: reason,
                    questions_answered: state.questions_answered(),
                },
            );
        }
    }

    async fn set_interview_status(&self, interview_id: i64, status: InterviewStatus) {
        match self.interviews.get(interview_id).await {
            Ok(Some(interview)) => self.update_interview(&interview, status).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(interview_id, "Failed to load interview record: {e:#}"),
        }
    }

    async fn update_interview(&self, interview: &InterviewDefinition, status: InterviewStatus) {
        let mut updated = interview.clone();
        updated.status = status;
        if let Err(e) = self.interviews.save(&updated).await {
            tracing::warn!(
                interview_id = interview.interview_id,
                "Failed to update interview record: {e:#}"
            );
        }
    }
}

fn session_key(session_token: &str) -> String {
    format!("session:{session_token}")
}

fn ensure_accepting(state: &SessionState) -> WorkflowResult<()> {
    if !state.is_active || !state.should_continue || state.status != InterviewStatus::InProgress {
        return Err(WorkflowError::Inactive {
            token: state.session_token.clone(),
            status: state.status,
        });
    }
    if state.current_step != Stage::AwaitingResponse {
        return Err(WorkflowError::InvalidState(format!(
            "Session is at {} and is not waiting for a response",
            state.current_step
        )));
    }
    Ok(())
}

fn submit_outcome(state: SessionState, answered_by_audio: bool) -> SubmitOutcome {
    let event = InterviewEvent::from_state(&state);
    let is_completed = !state.should_continue;
    SubmitOutcome {
        evaluation: state.latest_evaluation,
        transcript: if answered_by_audio { state.user_response } else { None },
        next_question: if is_completed { None } else { state.current_question },
        follow_up: state.follow_up_question,
        is_completed,
        termination_reason: state.termination_reason,
        warning: state.warning_message,
        notice: state.error_message,
        encouragement: state.encouragement_message,
        current_score: state.current_average_score,
        question_audio: state.question_audio,
        event,
    }
}

/// Logs errors that cross the caller boundary.
fn reported<T>(operation: &str, result: WorkflowResult<T>) -> WorkflowResult<T> {
    if let Err(e) = &result {
        if e.is_internal() {
            tracing::error!(operation, "{e}");
        } else {
            tracing::info!(operation, "Request rejected: {e}");
        }
    }
    result
}
