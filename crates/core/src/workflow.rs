use crate::audio::{analyze_speech, detect_emotions};
use crate::error::{WorkflowError, WorkflowResult};
use crate::evaluator::{Evaluator, RuleBasedEvaluator};
use crate::policy::WorkflowPolicy;
use crate::question_generator::{
    FollowUpContext, QuestionGenerator, fallback_follow_up, fallback_questions, normalize_criteria,
};
use crate::session_state::{
    ResponseRecord, SessionState, Stage, TerminationReason, TurnInput, word_count,
};
use crate::speech::SpeechSynthesizer;
use crate::stages;
use crate::transcription::TranscriptionAdapter;
use chrono::Utc;
use std::sync::Arc;

/// Result of one engine invocation.
///
/// `halted` carries the caller-facing error when a gate stage stopped the
/// run. The state is returned either way so the caller decides what, if
/// anything, to persist.
#[derive(Debug)]
pub struct PipelineRun {
    pub state: SessionState,
    pub halted: Option<WorkflowError>,
    pub transitions: usize,
}

/// The interview state machine.
///
/// Stages run one after another on an owned `SessionState`; `next_stage`
/// picks the successor from the state each stage leaves behind. A run stops
/// when the session waits for the candidate (`AwaitingResponse`), when it
/// ends (`End`), or when a gate stage halts it.
pub struct InterviewWorkflow {
    evaluator: Arc<dyn Evaluator>,
    generator: Arc<dyn QuestionGenerator>,
    transcription: TranscriptionAdapter,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    fallback: RuleBasedEvaluator,
    policy: WorkflowPolicy,
}

impl InterviewWorkflow {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        generator: Arc<dyn QuestionGenerator>,
        policy: WorkflowPolicy,
    ) -> Self {
        Self {
            evaluator,
            generator,
            transcription: TranscriptionAdapter::unavailable(),
            synthesizer: None,
            fallback: RuleBasedEvaluator::new(policy.default_criterion_score),
            policy,
        }
    }

    pub fn with_transcription(mut self, transcription: TranscriptionAdapter) -> Self {
        self.transcription = transcription;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Runs a fresh session up to its first question.
    pub async fn start(&self, state: SessionState) -> WorkflowResult<PipelineRun> {
        self.run_from(Stage::InitializeSession, state).await
    }

    /// Feeds one turn of candidate input into a session that is awaiting a response.
    pub async fn process_response(
        &self,
        mut state: SessionState,
        input: TurnInput,
    ) -> WorkflowResult<PipelineRun> {
        state.begin_turn(input);
        let entry = Self::response_entry(&state);
        self.run_from(entry, state).await
    }

    /// Stops the interview for `reason` and runs the completion stages.
    pub async fn conclude(
        &self,
        mut state: SessionState,
        reason: TerminationReason,
    ) -> WorkflowResult<PipelineRun> {
        state.should_continue = false;
        state.follow_up_question = None;
        state.termination_reason = Some(reason);
        self.run_from(Stage::CompleteInterview, state).await
    }

    /// Best-effort text to speech. `None` when no synthesizer is configured or it fails.
    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let synthesizer = self.synthesizer.as_ref()?;
        match synthesizer.synthesize(text).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                tracing::warn!("Speech synthesis failed, continuing text-only: {e:#}");
                None
            }
        }
    }

    pub fn response_entry(state: &SessionState) -> Stage {
        if state.response_timed_out {
            Stage::CheckTermination
        } else if state.audio_payload.is_some() {
            Stage::ProcessAudio
        } else {
            Stage::ValidateResponse
        }
    }

    pub fn next_stage(stage: Stage, state: &SessionState) -> Option<Stage> {
        use Stage::*;
        let go_on = state.should_continue;
        match stage {
            InitializeSession => Some(ValidateSession),
            ValidateSession => go_on.then_some(GenerateQuestions),
            GenerateQuestions => Some(CheckPrerequisites),
            CheckPrerequisites => go_on.then_some(PresentQuestion),
            PresentQuestion => Some(if go_on { AwaitingResponse } else { CompleteInterview }),
            AwaitingResponse => None,
            ProcessAudio => Some(ValidateResponse),
            ValidateResponse => go_on.then_some(EvaluateResponse),
            EvaluateResponse => Some(AnalyzeDepth),
            AnalyzeDepth => Some(GenerateFollowUp),
            GenerateFollowUp => Some(CalculateScore),
            CalculateScore => Some(GenerateFeedback),
            GenerateFeedback => Some(CheckTermination),
            CheckTermination | PrepareNextQuestion if !go_on => Some(CompleteInterview),
            CheckTermination => Some(PrepareNextQuestion),
            PrepareNextQuestion => Some(PresentQuestion),
            CompleteInterview => Some(GenerateInsights),
            GenerateInsights => Some(End),
            End => None,
        }
    }

    /// Gate stages turn a halted session into a caller-facing error.
    fn halted_by(stage: Stage, state: &SessionState) -> Option<WorkflowError> {
        if state.should_continue {
            return None;
        }
        let message = state
            .error_message
            .clone()
            .unwrap_or_else(|| format!("{stage} stopped the session"));
        match stage {
            Stage::ValidateSession | Stage::CheckPrerequisites => {
                Some(WorkflowError::Configuration(message))
            }
            Stage::ValidateResponse => Some(WorkflowError::Validation(message)),
            _ => None,
        }
    }

    pub async fn run_from(&self, entry: Stage, mut state: SessionState) -> WorkflowResult<PipelineRun> {
        let mut stage = entry;
        let mut transitions = 0;
        loop {
            if transitions >= self.policy.max_transitions {
                tracing::error!(
                    session_token = %state.session_token,
                    %stage,
                    "Workflow exceeded its transition budget"
                );
                return Err(WorkflowError::InvalidState(format!(
                    "Workflow exceeded {} stage transitions",
                    self.policy.max_transitions
                )));
            }
            transitions += 1;

            state = self.run_stage(stage, state).await;

            if let Some(err) = Self::halted_by(stage, &state) {
                tracing::info!(session_token = %state.session_token, %stage, "Workflow halted: {err}");
                return Ok(PipelineRun {
                    state,
                    halted: Some(err),
                    transitions,
                });
            }
            match Self::next_stage(stage, &state) {
                Some(next) => stage = next,
                None => {
                    return Ok(PipelineRun {
                        state,
                        halted: None,
                        transitions,
                    });
                }
            }
        }
    }

    pub async fn run_stage(&self, stage: Stage, mut state: SessionState) -> SessionState {
        tracing::debug!(session_token = %state.session_token, %stage, "Running stage");
        state.current_step = stage;
        let policy = &self.policy;
        match stage {
            Stage::InitializeSession => stages::initialize_session(state, Utc::now()),
            Stage::ValidateSession => stages::validate_session(state),
            Stage::GenerateQuestions => self.generate_questions(state).await,
            Stage::CheckPrerequisites => stages::check_prerequisites(state),
            Stage::PresentQuestion => self.present_question(state).await,
            Stage::AwaitingResponse | Stage::End => state,
            Stage::ProcessAudio => self.process_audio(state).await,
            Stage::ValidateResponse => stages::validate_response(state, policy),
            Stage::EvaluateResponse => self.evaluate_response(state).await,
            Stage::AnalyzeDepth => self.analyze_depth(state).await,
            Stage::GenerateFollowUp => self.generate_follow_up(state).await,
            Stage::CalculateScore => stages::calculate_score(state, policy),
            Stage::GenerateFeedback => stages::generate_feedback(state),
            Stage::CheckTermination => stages::check_termination(state, policy, Utc::now()),
            Stage::PrepareNextQuestion => stages::prepare_next_question(state),
            Stage::CompleteInterview => stages::complete_interview(state, Utc::now()),
            Stage::GenerateInsights => stages::generate_insights(state, Utc::now()),
        }
    }

    fn degrade(state: &mut SessionState, stage: Stage, err: anyhow::Error, message: &str) {
        let err = WorkflowError::Collaborator {
            stage,
            detail: format!("{err:#}"),
        };
        tracing::warn!(session_token = %state.session_token, "{err}");
        state.error_message = Some(message.to_string());
    }

    async fn generate_questions(&self, mut state: SessionState) -> SessionState {
        let count = self.policy.question_count;
        let generated = self
            .generator
            .generate(&state.position, state.interview_type, state.difficulty, count)
            .await;

        let mut questions = match generated {
            Ok(questions) if !questions.is_empty() || count == 0 => questions,
            Ok(_) => {
                state.error_message =
                    Some("Question generator returned nothing; using built-in questions".to_string());
                fallback_questions(&state.position, state.interview_type, state.difficulty, count)
            }
            Err(e) => {
                Self::degrade(
                    &mut state,
                    Stage::GenerateQuestions,
                    e,
                    "Question generation failed; using built-in questions",
                );
                fallback_questions(&state.position, state.interview_type, state.difficulty, count)
            }
        };
        for question in &mut questions {
            normalize_criteria(&mut question.evaluation_criteria);
        }

        tracing::info!(
            session_token = %state.session_token,
            count = questions.len(),
            "Questions ready"
        );
        state.questions_generated = questions;
        state.current_question_index = 0;
        state
    }

    async fn present_question(&self, state: SessionState) -> SessionState {
        let mut state = stages::present_question(state);
        if !state.should_continue {
            return state;
        }
        let text = state.current_question.as_ref().map(|q| q.question.clone());
        if let Some(text) = text {
            state.question_audio = self.synthesize(&text).await;
        }
        state
    }

    async fn process_audio(&self, mut state: SessionState) -> SessionState {
        let Some(audio) = state.audio_payload.as_ref() else {
            return state;
        };
        let transcript = self.transcription.transcribe(&audio.bytes, audio.format).await;

        if TranscriptionAdapter::is_placeholder(&transcript) {
            state.warning_message = Some(transcript.clone());
            // A typed answer sent alongside the recording wins over a placeholder.
            if state
                .user_response
                .as_deref()
                .is_some_and(|text| !text.trim().is_empty())
            {
                return state;
            }
        } else {
            state.pending_speech_analysis = Some(analyze_speech(audio.len(), &transcript));
            state.pending_emotion_analysis = Some(detect_emotions(&transcript));
        }
        state.user_response = Some(transcript);
        state
    }

    async fn evaluate_response(&self, mut state: SessionState) -> SessionState {
        let (Some(question), Some(response)) =
            (state.current_question.clone(), state.user_response.clone())
        else {
            state.error_message = Some("No question or response to evaluate".to_string());
            return state;
        };

        let result = self
            .evaluator
            .evaluate(
                &question.question,
                &response,
                &question.expected_points,
                &question.evaluation_criteria,
            )
            .await;
        let mut evaluation = match result {
            Ok(evaluation) => evaluation,
            Err(e) => {
                Self::degrade(
                    &mut state,
                    Stage::EvaluateResponse,
                    e,
                    "Evaluation service unavailable; a provisional score was recorded",
                );
                self.fallback
                    .score(&response, &question.expected_points, &question.evaluation_criteria)
            }
        };
        evaluation.overall_score = evaluation.overall_score.clamp(0.0, 10.0);

        let now = Utc::now();
        let audio = state.audio_payload.as_ref();
        let record = ResponseRecord {
            question,
            word_count: word_count(&response),
            response,
            evaluation: evaluation.clone(),
            timestamp: Some(now),
            is_follow_up: state.is_follow_up,
            has_audio: audio.is_some(),
            audio_reference: audio.and_then(|a| a.archive_ref.clone()),
            speech_analysis: state.pending_speech_analysis.take(),
            emotion_analysis: state.pending_emotion_analysis.take(),
        };
        state.responses_history.push(record);
        state.latest_evaluation = Some(evaluation);
        state.last_activity_at = Some(now);
        state
    }

    async fn analyze_depth(&self, mut state: SessionState) -> SessionState {
        let (Some(question), Some(response)) =
            (state.current_question.clone(), state.user_response.clone())
        else {
            return state;
        };
        if state.latest_evaluation.is_none() {
            return state;
        }

        let analysis = match self
            .evaluator
            .analyze_depth(&question, &response, state.interview_type)
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                Self::degrade(
                    &mut state,
                    Stage::AnalyzeDepth,
                    e,
                    "Depth analysis unavailable; heuristics were used",
                );
                self.fallback.depth(&question, &response, state.interview_type)
            }
        };
        state.depth_analysis = Some(analysis);
        state
    }

    /// Asks for one follow-up when the answer scored low or was short. A
    /// question never gets more than `max_follow_ups_per_question`.
    async fn generate_follow_up(&self, mut state: SessionState) -> SessionState {
        let (Some(evaluation), Some(question), Some(response)) = (
            state.latest_evaluation.as_ref(),
            state.current_question.clone(),
            state.user_response.clone(),
        ) else {
            return state;
        };
        if !state.should_continue
            || state.follow_ups_for_current >= self.policy.max_follow_ups_per_question
        {
            return state;
        }
        let score = evaluation.overall_score;
        let needs_follow_up = score < self.policy.follow_up_score_below
            || word_count(&response) < self.policy.follow_up_words_below;
        if !needs_follow_up {
            return state;
        }

        let context = FollowUpContext {
            position: state.position.clone(),
            interview_type: state.interview_type,
            difficulty: state.difficulty,
            current_score: score,
        };
        let mut follow_up = match self.generator.follow_up(&question, &response, &context).await {
            Ok(follow_up) => follow_up,
            Err(e) => {
                Self::degrade(
                    &mut state,
                    Stage::GenerateFollowUp,
                    e,
                    "Follow-up generation failed; a standard follow-up was used",
                );
                fallback_follow_up(&question, &response, &context)
            }
        };
        follow_up.kind = "follow_up".to_string();
        normalize_criteria(&mut follow_up.evaluation_criteria);
        state.follow_up_question = Some(follow_up);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, AudioPayload};
    use crate::evaluator::MockEvaluator;
    use crate::question_generator::{MockQuestionGenerator, TemplateQuestionGenerator};
    use crate::session_state::{
        DepthAnalysis, Difficulty, Evaluation, InterviewStatus, InterviewType,
    };
    use crate::speech::MockSpeechSynthesizer;
    use crate::transcription::{MockTranscriber, Transcript};

    const LONG_ANSWER: &str = "I would start by profiling the service under realistic load, identify the hottest code paths, add caching where reads dominate, and then verify the gains with repeatable benchmarks before rollout.";

    fn scoring(score: f64) -> MockEvaluator {
        let mut evaluator = MockEvaluator::new();
        evaluator.expect_evaluate().returning(move |_, _, _, _| {
            Box::pin(async move {
                Ok(Evaluation {
                    overall_score: score,
                    feedback: "scored".to_string(),
                    ..Default::default()
                })
            })
        });
        evaluator
            .expect_analyze_depth()
            .returning(|_, _, _| Box::pin(async { Ok(DepthAnalysis::default()) }));
        evaluator
    }

    fn workflow(evaluator: MockEvaluator, policy: WorkflowPolicy) -> InterviewWorkflow {
        InterviewWorkflow::new(Arc::new(evaluator), Arc::new(TemplateQuestionGenerator), policy)
    }

    fn new_session() -> SessionState {
        SessionState::new(
            "session-1",
            10,
            Some(7),
            "Backend Engineer",
            InterviewType::Technical,
            Difficulty::Medium,
            60,
        )
    }

    async fn started(engine: &InterviewWorkflow) -> SessionState {
        let run = engine.start(new_session()).await.unwrap();
        assert!(run.halted.is_none());
        run.state
    }

    #[tokio::test]
    async fn test_start_stops_at_first_question() {
        // Arrange
        let engine = workflow(scoring(7.0), WorkflowPolicy::default());

        // Act
        let state = started(&engine).await;

        // Assert
        assert_eq!(state.current_step, Stage::AwaitingResponse);
        assert_eq!(state.status, InterviewStatus::InProgress);
        assert_eq!(state.questions_generated.len(), 5);
        assert_eq!(state.current_question.as_ref(), state.questions_generated.first());
        assert!(state.should_continue && state.is_active);
        assert!(state.started_at.is_some());
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_builtin_questions() {
        let mut generator = MockQuestionGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Err(anyhow::anyhow!("rate limited")) }));
        let engine = InterviewWorkflow::new(
            Arc::new(scoring(7.0)),
            Arc::new(generator),
            WorkflowPolicy::default(),
        );

        let state = started(&engine).await;

        assert_eq!(state.questions_generated.len(), 5);
        assert!(state.error_message.unwrap().contains("built-in questions"));
    }

    #[tokio::test]
    async fn test_missing_questions_is_a_configuration_error() {
        let policy = WorkflowPolicy {
            question_count: 0,
            ..Default::default()
        };
        let engine = workflow(scoring(7.0), policy);

        let run = engine.start(new_session()).await.unwrap();

        assert!(matches!(run.halted, Some(WorkflowError::Configuration(_))));
        assert!(!run.state.is_active);
        assert_eq!(run.state.current_step, Stage::CheckPrerequisites);
    }

    #[tokio::test]
    async fn test_answer_advances_to_next_question() {
        let engine = workflow(scoring(7.0), WorkflowPolicy::default());
        let state = started(&engine).await;

        let run = engine
            .process_response(state, TurnInput::text(LONG_ANSWER))
            .await
            .unwrap();
        let state = run.state;

        assert!(run.halted.is_none());
        assert_eq!(state.responses_history.len(), 1);
        assert_eq!(state.current_question_index, 1);
        assert_eq!(state.current_question.as_ref(), state.questions_generated.get(1));
        assert_eq!(state.total_score, 7.0);
        assert!(state.follow_up_question.is_none());
        assert!(state.encouragement_message.is_some());
        assert_eq!(state.current_step, Stage::AwaitingResponse);
    }

    #[tokio::test]
    async fn test_short_response_is_rejected_before_evaluation() {
        let mut evaluator = MockEvaluator::new();
        evaluator.expect_evaluate().never();
        let engine = workflow(evaluator, WorkflowPolicy::default());
        let state = started(&engine).await;

        let run = engine
            .process_response(state, TurnInput::text("abc"))
            .await
            .unwrap();

        assert!(matches!(run.halted, Some(WorkflowError::Validation(_))));
        assert!(run.state.responses_history.is_empty());
    }

    #[tokio::test]
    async fn test_excellent_answers_end_interview_early() {
        let engine = workflow(scoring(9.5), WorkflowPolicy::default());
        let mut state = started(&engine).await;

        for _ in 0..4 {
            let run = engine
                .process_response(state, TurnInput::text(LONG_ANSWER))
                .await
                .unwrap();
            state = run.state;
        }

        assert!(!state.should_continue);
        assert_eq!(
            state.termination_reason,
            Some(TerminationReason::EarlyTerminationExcellentPerformance)
        );
        assert_eq!(state.status, InterviewStatus::Completed);
        assert_eq!(state.current_step, Stage::End);
        assert_eq!(state.responses_history.len(), 4);
        assert_eq!(state.difficulty, Difficulty::Hard);
        assert!(state.final_assessment.is_some());
        assert!(state.interview_insights.is_some());
    }

    #[tokio::test]
    async fn test_poor_answers_end_interview_early() {
        let engine = workflow(scoring(2.0), WorkflowPolicy::default());
        let mut state = started(&engine).await;

        // Question, its follow-up, then the next question: three scored turns.
        for _ in 0..3 {
            assert!(state.should_continue);
            state = engine
                .process_response(state, TurnInput::text(LONG_ANSWER))
                .await
                .unwrap()
                .state;
        }

        assert!(!state.should_continue);
        assert_eq!(
            state.termination_reason,
            Some(TerminationReason::EarlyTerminationPoorPerformance)
        );
        assert_eq!(state.responses_history.len(), 3);
        assert_eq!(state.difficulty, Difficulty::Easy);
        assert_eq!(state.status, InterviewStatus::Completed);
        assert!(state.follow_up_question.is_none());
    }

    #[tokio::test]
    async fn test_question_index_never_moves_backwards() {
        let policy = WorkflowPolicy {
            question_count: 4,
            ..Default::default()
        };
        let engine = workflow(scoring(5.0), policy);
        let mut state = started(&engine).await;
        let inputs = [
            TurnInput::text("I am not really sure"),
            TurnInput::timed_out(),
            TurnInput::text(LONG_ANSWER),
        ];

        let mut previous = state.current_question_index;
        for input in inputs.iter().cycle().take(12) {
            if !state.should_continue {
                break;
            }
            state = engine
                .process_response(state, input.clone())
                .await
                .unwrap()
                .state;

            assert!(state.current_question_index >= previous);
            assert!(state.current_question_index <= state.questions_generated.len());
            previous = state.current_question_index;
        }

        assert!(!state.should_continue);
        assert_eq!(state.termination_reason, Some(TerminationReason::AllQuestionsCompleted));
    }

    #[tokio::test]
    async fn test_weak_answer_gets_one_follow_up() {
        let policy = WorkflowPolicy {
            question_count: 2,
            ..Default::default()
        };
        let engine = workflow(scoring(3.0), policy);
        let state = started(&engine).await;

        // First answer is short and weak: a follow-up replaces the next question.
        let state = engine
            .process_response(state, TurnInput::text("I am not really sure"))
            .await
            .unwrap()
            .state;

        let follow_up = state.follow_up_question.clone().unwrap();
        assert_eq!(follow_up.kind, "follow_up");
        assert_eq!(state.current_question, Some(follow_up));
        assert_eq!(state.current_question_index, 0);
        assert!(state.is_follow_up && state.should_continue);

        // Answering the follow-up moves on without a second follow-up.
        let state = engine
            .process_response(state, TurnInput::text("Still not really sure"))
            .await
            .unwrap()
            .state;

        assert!(state.follow_up_question.is_none());
        assert!(!state.is_follow_up);
        assert_eq!(state.current_question_index, 1);
        assert_eq!(state.responses_history.len(), 2);
        assert!(state.responses_history[1].is_follow_up);
    }

    #[tokio::test]
    async fn test_timeout_skips_question_without_recording() {
        let mut evaluator = MockEvaluator::new();
        evaluator.expect_evaluate().never();
        let engine = workflow(evaluator, WorkflowPolicy::default());
        let state = started(&engine).await;

        let state = engine
            .process_response(state, TurnInput::timed_out())
            .await
            .unwrap()
            .state;

        assert!(state.responses_history.is_empty());
        assert_eq!(state.current_question_index, 1);
        assert_eq!(state.current_step, Stage::AwaitingResponse);
    }

    #[tokio::test]
    async fn test_evaluator_failure_records_provisional_score() {
        let mut evaluator = MockEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _, _, _| Box::pin(async { Err(anyhow::anyhow!("timeout")) }));
        evaluator
            .expect_analyze_depth()
            .returning(|_, _, _| Box::pin(async { Err(anyhow::anyhow!("timeout")) }));
        let engine = workflow(evaluator, WorkflowPolicy::default());
        let state = started(&engine).await;

        let state = engine
            .process_response(state, TurnInput::text(LONG_ANSWER))
            .await
            .unwrap()
            .state;

        assert_eq!(state.responses_history.len(), 1);
        assert!(state.responses_history[0].evaluation.fallback);
        assert!(state.depth_analysis.unwrap().fallback);
        assert!(state.error_message.is_some());
        assert!(state.should_continue);
    }

    #[tokio::test]
    async fn test_audio_turn_is_transcribed_and_analyzed() {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().times(1).returning(|_, _| {
            Box::pin(async {
                Ok(Transcript {
                    text: LONG_ANSWER.to_string(),
                    confidence: 0.9,
                })
            })
        });
        let engine = workflow(scoring(7.0), WorkflowPolicy::default())
            .with_transcription(TranscriptionAdapter::new(Arc::new(transcriber)));
        let state = started(&engine).await;
        let mut audio = AudioPayload::new(vec![0u8; 64_000], Some(AudioFormat::Wav));
        audio.archive_ref = Some("archive/session-1/0.wav".to_string());

        let state = engine
            .process_response(state, TurnInput::audio(audio))
            .await
            .unwrap()
            .state;

        let record = &state.responses_history[0];
        assert_eq!(record.response, LONG_ANSWER);
        assert!(record.has_audio);
        assert_eq!(record.audio_reference.as_deref(), Some("archive/session-1/0.wav"));
        assert_eq!(record.speech_analysis.as_ref().unwrap().word_count, 30);
        assert_eq!(record.emotion_analysis.as_ref().unwrap().emotion_scores.len(), 5);
    }

    #[tokio::test]
    async fn test_synthesizer_failure_keeps_text_question() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .returning(|_| Box::pin(async { Err(anyhow::anyhow!("tts offline")) }));
        let engine =
            workflow(scoring(7.0), WorkflowPolicy::default()).with_synthesizer(Arc::new(synthesizer));

        let state = started(&engine).await;

        assert!(state.current_question.is_some());
        assert!(state.question_audio.is_none());
    }

    #[tokio::test]
    async fn test_transition_budget_is_enforced() {
        let policy = WorkflowPolicy {
            max_transitions: 3,
            ..Default::default()
        };
        let engine = workflow(scoring(7.0), policy);

        let result = engine.start(new_session()).await;

        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_conclude_runs_completion_stages() {
        let engine = workflow(scoring(6.0), WorkflowPolicy::default());
        let state = started(&engine).await;
        let state = engine
            .process_response(state, TurnInput::text(LONG_ANSWER))
            .await
            .unwrap()
            .state;

        let state = engine
            .conclude(state, TerminationReason::ManualTermination("panel decision".into()))
            .await
            .unwrap()
            .state;

        assert_eq!(state.current_step, Stage::End);
        assert_eq!(state.status, InterviewStatus::Completed);
        assert_eq!(
            state.interview_report.unwrap().termination_reason,
            "manual_termination:panel decision"
        );
    }

    #[test]
    fn test_routing_never_presents_after_termination() {
        let mut state = new_session();
        state.should_continue = false;

        assert_eq!(
            InterviewWorkflow::next_stage(Stage::CheckTermination, &state),
            Some(Stage::CompleteInterview)
        );
        assert_eq!(
            InterviewWorkflow::next_stage(Stage::PrepareNextQuestion, &state),
            Some(Stage::CompleteInterview)
        );
        assert_eq!(InterviewWorkflow::next_stage(Stage::ValidateResponse, &state), None);
    }
}
