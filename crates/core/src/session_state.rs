use crate::assessment::{FinalAssessment, InterviewInsights, InterviewReport};
use crate::audio::{AudioPayload, EmotionAnalysis, SpeechAnalysis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewType {
    #[default]
    Technical,
    Behavioral,
    Mixed,
}

impl InterviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Behavioral => "behavioral",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for InterviewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterviewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "technical" => Ok(Self::Technical),
            "behavioral" | "behavioural" => Ok(Self::Behavioral),
            "mixed" => Ok(Self::Mixed),
            other => Err(format!("unknown interview type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// Lifecycle status shared by interview definitions and their sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    #[default]
    Created,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for InterviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The named steps of the interview workflow.
///
/// `current_step` on a persisted session is the resumption cursor: a session
/// that waits for the candidate always rests on `AwaitingResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    InitializeSession,
    ValidateSession,
    GenerateQuestions,
    CheckPrerequisites,
    PresentQuestion,
    AwaitingResponse,
    ProcessAudio,
    ValidateResponse,
    EvaluateResponse,
    AnalyzeDepth,
    GenerateFollowUp,
    CalculateScore,
    GenerateFeedback,
    CheckTermination,
    PrepareNextQuestion,
    CompleteInterview,
    GenerateInsights,
    End,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitializeSession => "initialize_session",
            Self::ValidateSession => "validate_session",
            Self::GenerateQuestions => "generate_questions",
            Self::CheckPrerequisites => "check_prerequisites",
            Self::PresentQuestion => "present_question",
            Self::AwaitingResponse => "awaiting_response",
            Self::ProcessAudio => "process_audio",
            Self::ValidateResponse => "validate_response",
            Self::EvaluateResponse => "evaluate_response",
            Self::AnalyzeDepth => "analyze_depth",
            Self::GenerateFollowUp => "generate_follow_up",
            Self::CalculateScore => "calculate_score",
            Self::GenerateFeedback => "generate_feedback",
            Self::CheckTermination => "check_termination",
            Self::PrepareNextQuestion => "prepare_next_question",
            Self::CompleteInterview => "complete_interview",
            Self::GenerateInsights => "generate_insights",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session stopped asking questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    AllQuestionsCompleted,
    EarlyTerminationPoorPerformance,
    EarlyTerminationExcellentPerformance,
    TimeLimitReached,
    CompletedNormally,
    ManualTermination(String),
    Cancelled(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllQuestionsCompleted => f.write_str("all_questions_completed"),
            Self::EarlyTerminationPoorPerformance => {
                f.write_str("early_termination_poor_performance")
            }
            Self::EarlyTerminationExcellentPerformance => {
                f.write_str("early_termination_excellent_performance")
            }
            Self::TimeLimitReached => f.write_str("time_limit_reached"),
            Self::CompletedNormally => f.write_str("completed_normally"),
            Self::ManualTermination(reason) => write!(f, "manual_termination:{reason}"),
            Self::Cancelled(reason) => write!(f, "cancelled:{reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Question {
    pub question: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub difficulty: Difficulty,
    pub expected_points: Vec<String>,
    /// Rubric criterion name to weight. Weights sum to 1.0 within a tolerance of 0.1.
    pub evaluation_criteria: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Question {
    pub fn new(question: impl Into<String>, kind: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            question: question.into(),
            kind: kind.into(),
            difficulty,
            ..Default::default()
        }
    }

    pub fn with_expected_points<I, S>(mut self, points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_points = points.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.evaluation_criteria = criteria.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    /// 0.0 to 10.0
    pub overall_score: f64,
    pub feedback: String,
    pub detailed_analysis: BTreeMap<String, f64>,
    pub improvements: Vec<String>,
    /// Set when the score came from the deterministic scorer instead of the model.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StarCoverage {
    pub situation: bool,
    pub task: bool,
    pub action: bool,
    pub result: bool,
}

impl StarCoverage {
    pub fn covered(&self) -> usize {
        [self.situation, self.task, self.action, self.result]
            .iter()
            .filter(|c| **c)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthAnalysis {
    pub depth_score: f64,
    /// "basic", "intermediate" or "advanced"
    pub complexity_level: String,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub star: Option<StarCoverage>,
    pub fallback: bool,
}

/// One answered turn. Records are append-only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseRecord {
    pub question: Question,
    pub response: String,
    pub evaluation: Evaluation,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_follow_up: bool,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_analysis: Option<SpeechAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion_analysis: Option<EmotionAnalysis>,
    pub word_count: usize,
}

/// The single value threaded through every workflow stage and persisted
/// between turns.
///
/// Transient per-turn inputs are `#[serde(skip)]`: raw audio and the raw
/// response text never reach a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub session_token: String,
    pub interview_id: i64,
    pub user_id: Option<i64>,
    pub position: String,
    pub interview_type: InterviewType,
    pub difficulty: Difficulty,
    pub max_duration_minutes: u32,
    pub status: InterviewStatus,
    pub is_active: bool,

    pub current_step: Stage,
    pub current_question_index: usize,
    pub questions_generated: Vec<Question>,
    pub current_question: Option<Question>,
    pub is_follow_up: bool,
    /// Follow-up produced by the most recent turn, if any.
    pub follow_up_question: Option<Question>,
    pub follow_ups_for_current: u32,

    #[serde(skip)]
    pub user_response: Option<String>,
    #[serde(skip)]
    pub audio_payload: Option<AudioPayload>,
    #[serde(skip)]
    pub response_timed_out: bool,
    #[serde(skip)]
    pub pending_speech_analysis: Option<SpeechAnalysis>,
    #[serde(skip)]
    pub pending_emotion_analysis: Option<EmotionAnalysis>,
    #[serde(skip)]
    pub question_audio: Option<Vec<u8>>,

    pub responses_history: Vec<ResponseRecord>,
    pub total_score: f64,
    pub current_average_score: f64,
    pub latest_evaluation: Option<Evaluation>,
    pub depth_analysis: Option<DepthAnalysis>,

    pub should_continue: bool,
    pub error_message: Option<String>,
    pub warning_message: Option<String>,
    pub encouragement_message: Option<String>,
    pub adjustment_message: Option<String>,
    pub difficulty_adjustments: u32,
    pub termination_reason: Option<TerminationReason>,
    pub manual_feedback: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,

    pub final_assessment: Option<FinalAssessment>,
    pub interview_report: Option<InterviewReport>,
    pub interview_insights: Option<InterviewInsights>,

    /// Set when the snapshot this state came from was damaged and partially rebuilt.
    pub recovered: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_token: String::new(),
            interview_id: 0,
            user_id: None,
            position: String::new(),
            interview_type: InterviewType::default(),
            difficulty: Difficulty::default(),
            max_duration_minutes: 60,
            status: InterviewStatus::default(),
            is_active: false,
            current_step: Stage::default(),
            current_question_index: 0,
            questions_generated: Vec::new(),
            current_question: None,
            is_follow_up: false,
            follow_up_question: None,
            follow_ups_for_current: 0,
            user_response: None,
            audio_payload: None,
            response_timed_out: false,
            pending_speech_analysis: None,
            pending_emotion_analysis: None,
            question_audio: None,
            responses_history: Vec::new(),
            total_score: 0.0,
            current_average_score: 0.0,
            latest_evaluation: None,
            depth_analysis: None,
            should_continue: true,
            error_message: None,
            warning_message: None,
            encouragement_message: None,
            adjustment_message: None,
            difficulty_adjustments: 0,
            termination_reason: None,
            manual_feedback: None,
            started_at: None,
            completed_at: None,
            last_activity_at: None,
            final_assessment: None,
            interview_report: None,
            interview_insights: None,
            recovered: false,
        }
    }
}

/// Candidate input for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: Option<String>,
    pub audio: Option<AudioPayload>,
    pub timed_out: bool,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn audio(audio: AudioPayload) -> Self {
        Self {
            audio: Some(audio),
            ..Default::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }
}

impl SessionState {
    pub fn new(
        session_token: impl Into<String>,
        interview_id: i64,
        user_id: Option<i64>,
        position: impl Into<String>,
        interview_type: InterviewType,
        difficulty: Difficulty,
        max_duration_minutes: u32,
    ) -> Self {
        Self {
            session_token: session_token.into(),
            interview_id,
            user_id,
            position: position.into(),
            interview_type,
            difficulty,
            max_duration_minutes,
            ..Default::default()
        }
    }

    pub fn questions_answered(&self) -> usize {
        self.responses_history.len()
    }

    pub fn follow_ups_asked(&self) -> usize {
        self.responses_history
            .iter()
            .filter(|r| r.is_follow_up)
            .count()
    }

    /// Recomputes `total_score` and `current_average_score` from the history.
    pub fn recompute_scores(&mut self) {
        self.total_score = self
            .responses_history
            .iter()
            .map(|r| r.evaluation.overall_score)
            .sum();
        self.current_average_score = if self.responses_history.is_empty() {
            0.0
        } else {
            self.total_score / self.responses_history.len() as f64
        };
    }

    /// Clears the per-turn outputs of the previous turn and installs new input.
    pub fn begin_turn(&mut self, input: TurnInput) {
        self.error_message = None;
        self.warning_message = None;
        self.encouragement_message = None;
        self.adjustment_message = None;
        self.latest_evaluation = None;
        self.depth_analysis = None;
        self.follow_up_question = None;
        self.pending_speech_analysis = None;
        self.pending_emotion_analysis = None;
        self.question_audio = None;
        self.user_response = input.text;
        self.audio_payload = input.audio;
        self.response_timed_out = input.timed_out;
    }

    pub fn halt(&mut self, message: impl Into<String>) {
        self.should_continue = false;
        self.error_message = Some(message.into());
    }

    /// Whether the candidate can currently submit a response.
    pub fn accepts_responses(&self) -> bool {
        self.is_active
            && self.should_continue
            && self.status == InterviewStatus::InProgress
            && self.current_step == Stage::AwaitingResponse
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(score: f64, follow_up: bool) -> ResponseRecord {
        ResponseRecord {
            evaluation: Evaluation {
                overall_score: score,
                ..Default::default()
            },
            is_follow_up: follow_up,
            ..Default::default()
        }
    }

    #[test]
    fn test_scores_are_recomputed_from_history() {
        let mut state = SessionState::default();
        state.responses_history = vec![record(6.0, false), record(8.0, true)];
        state.total_score = 999.0;

        state.recompute_scores();

        assert_eq!(state.total_score, 14.0);
        assert_eq!(state.current_average_score, 7.0);
        assert_eq!(state.follow_ups_asked(), 1);
    }

    #[test]
    fn test_transient_fields_never_serialized() {
        let mut state = SessionState::new(
            "tok",
            1,
            Some(2),
            "Engineer",
            InterviewType::Technical,
            Difficulty::Medium,
            60,
        );
        state.begin_turn(TurnInput {
            text: Some("my secret answer".into()),
            audio: Some(AudioPayload::new(vec![1, 2, 3], None)),
            timed_out: false,
        });

        let json = serde_json::to_string(&state).unwrap();

        assert!(!json.contains("my secret answer"));
        assert!(!json.contains("audio_payload"));
        assert!(!json.contains("user_response"));
    }

    #[test]
    fn test_begin_turn_clears_previous_outputs() {
        let mut state = SessionState::default();
        state.follow_up_question = Some(Question::new("Why?", "follow_up", Difficulty::Easy));
        state.error_message = Some("old".into());
        state.latest_evaluation = Some(Evaluation::default());

        state.begin_turn(TurnInput::text("new answer"));

        assert!(state.follow_up_question.is_none());
        assert!(state.error_message.is_none());
        assert!(state.latest_evaluation.is_none());
        assert_eq!(state.user_response.as_deref(), Some("new answer"));
    }

    #[test]
    fn test_termination_reason_display() {
        assert_eq!(
            TerminationReason::EarlyTerminationPoorPerformance.to_string(),
            "early_termination_poor_performance"
        );
        assert_eq!(
            TerminationReason::Cancelled("candidate left".into()).to_string(),
            "cancelled:candidate left"
        );
        assert_eq!(
            TerminationReason::ManualTermination("enough signal".into()).to_string(),
            "manual_termination:enough signal"
        );
    }

    #[test]
    fn test_interview_type_parses_leniently() {
        assert_eq!(" Behavioral ".parse::<InterviewType>(), Ok(InterviewType::Behavioral));
        assert!("panel".parse::<InterviewType>().is_err());
    }
}
