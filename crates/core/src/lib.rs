pub mod archive;
pub mod assessment;
pub mod audio;
pub mod coverage;
pub mod error;
pub mod evaluator;
pub mod llm;
pub mod notify;
pub mod policy;
pub mod prompts;
pub mod question_generator;
pub mod repository;
pub mod service;
pub mod session_state;
pub mod speech;
pub mod stages;
pub mod store;
pub mod transcription;
pub mod workflow;

pub use error::{WorkflowError, WorkflowResult};
pub use service::InterviewService;
pub use session_state::SessionState;
pub use workflow::InterviewWorkflow;

use assessment::FinalAssessment;
use session_state::{Question, TerminationReason};

/// Represents what the core asks the runtime to present after a turn.
///
/// This enum decouples the workflow's decisions from how the runtime shows
/// them (printing, speaking, or sending them over a socket).
#[derive(Debug, Clone, PartialEq)]
pub enum InterviewEvent {
    /// Present the next question from the generated list.
    AskQuestion(Question),
    /// Present a follow-up to the question just answered.
    AskFollowUp(Question),
    /// The interview is over.
    Completed {
        reason: TerminationReason,
        assessment: FinalAssessment,
    },
}

impl InterviewEvent {
    /// The event a session in this state should surface, if any.
    pub fn from_state(state: &SessionState) -> Option<Self> {
        if !state.should_continue {
            return Some(Self::Completed {
                reason: state
                    .termination_reason
                    .clone()
                    .unwrap_or(TerminationReason::CompletedNormally),
                assessment: state.final_assessment.clone().unwrap_or_default(),
            });
        }
        let question = state.current_question.clone()?;
        Some(if state.is_follow_up {
            Self::AskFollowUp(question)
        } else {
            Self::AskQuestion(question)
        })
    }
}
