//! Stage transitions that need no collaborator.
//!
//! Each function takes the session by value and returns the next version of
//! it. The engine owns routing between stages and stamps `current_step`.

use crate::assessment::{final_assessment, interview_insights, interview_report};
use crate::policy::WorkflowPolicy;
use crate::session_state::{
    Difficulty, InterviewStatus, SessionState, TerminationReason, word_count,
};
use chrono::{DateTime, Utc};

pub fn initialize_session(mut state: SessionState, now: DateTime<Utc>) -> SessionState {
    state.started_at.get_or_insert(now);
    state.last_activity_at = Some(now);
    state.current_question_index = 0;
    state.is_follow_up = false;
    state.follow_up_question = None;
    state.should_continue = true;
    state.is_active = true;
    state.status = InterviewStatus::InProgress;
    state.error_message = None;
    state
}

pub fn validate_session(mut state: SessionState) -> SessionState {
    if state.session_token.trim().is_empty() {
        state.halt("Invalid session token");
    } else if state.user_id.is_none() {
        state.halt("User not authenticated");
    }
    state
}

/// Halts the session when it is not ready to present questions.
pub fn check_prerequisites(mut state: SessionState) -> SessionState {
    let mut missing = Vec::new();
    if state.questions_generated.is_empty() {
        missing.push("no questions were generated");
    }
    if state.position.trim().is_empty() {
        missing.push("position is not set");
    }
    if state.user_id.is_none() {
        missing.push("user is not authenticated");
    }
    if state.session_token.trim().is_empty() {
        missing.push("session token is missing");
    }

    if !missing.is_empty() {
        state.halt(format!("Prerequisites not met: {}", missing.join(", ")));
        state.is_active = false;
    }
    state
}

/// Makes the question at `current_question_index` current unless a follow-up
/// is already in place. A terminal session is left untouched.
pub fn present_question(mut state: SessionState) -> SessionState {
    if !state.should_continue {
        return state;
    }
    if state.is_follow_up && state.current_question.is_some() {
        return state;
    }
    match state.questions_generated.get(state.current_question_index) {
        Some(question) => state.current_question = Some(question.clone()),
        None => {
            state.should_continue = false;
            state
                .termination_reason
                .get_or_insert(TerminationReason::AllQuestionsCompleted);
        }
    }
    state
}

/// Rejects empty or too-short answers; flags unusually brief or long ones.
pub fn validate_response(mut state: SessionState, policy: &WorkflowPolicy) -> SessionState {
    let text = state.user_response.as_deref().unwrap_or("").trim().to_string();

    if text.chars().count() < policy.min_response_chars {
        state.halt("Response too short or empty");
        return state;
    }

    let words = word_count(&text);
    if words > policy.long_response_words {
        state.warning_message =
            Some("Response is very long; consider being more concise".to_string());
    } else if words < policy.brief_response_words {
        state.warning_message =
            Some("Response is quite brief; consider adding more detail".to_string());
    }
    state.user_response = Some(text);
    state
}

/// Recomputes the running scores from history and moves difficulty to the
/// extremes when the average leaves the comfortable band.
pub fn calculate_score(mut state: SessionState, policy: &WorkflowPolicy) -> SessionState {
    state.recompute_scores();
    if state.latest_evaluation.is_none() {
        return state;
    }

    let average = state.current_average_score;
    let target = if average > policy.raise_difficulty_above {
        Some((Difficulty::Hard, "Increasing difficulty after strong answers"))
    } else if average < policy.lower_difficulty_below {
        Some((Difficulty::Easy, "Easing difficulty to keep the interview productive"))
    } else {
        None
    };

    let Some((difficulty, message)) = target else {
        return state;
    };
    if state.difficulty != difficulty {
        tracing::info!(
            session_token = %state.session_token,
            from = %state.difficulty,
            to = %difficulty,
            average,
            "Adjusting difficulty"
        );
        state.difficulty = difficulty;
        state.difficulty_adjustments += 1;
        state.adjustment_message = Some(message.to_string());
    }
    state
}

pub fn encouragement(score: f64) -> &'static str {
    match score {
        s if s >= 8.0 => "Excellent answer! You clearly know this area well.",
        s if s >= 6.0 => "Good answer. You are on the right track.",
        s if s >= 4.0 => "Thanks for that. Try to add more specific detail next time.",
        _ => "Thanks for your answer. Let's keep going; take your time with the next one.",
    }
}

pub fn generate_feedback(mut state: SessionState) -> SessionState {
    if let Some(evaluation) = &state.latest_evaluation {
        state.encouragement_message = Some(encouragement(evaluation.overall_score).to_string());
    }
    state
}

/// Decides whether the interview goes on. Checked in order: poor
/// performance, excellent performance, time limit, exhausted questions.
pub fn check_termination(
    mut state: SessionState,
    policy: &WorkflowPolicy,
    now: DateTime<Utc>,
) -> SessionState {
    let answered = state.questions_answered();
    let average = state.current_average_score;

    let reason = if answered >= policy.poor_performance_min_turns
        && average < policy.poor_performance_below
    {
        Some(TerminationReason::EarlyTerminationPoorPerformance)
    } else if answered >= policy.excellent_performance_min_turns
        && average > policy.excellent_performance_above
    {
        Some(TerminationReason::EarlyTerminationExcellentPerformance)
    } else if state.started_at.is_some_and(|start| {
        (now - start).num_seconds() > i64::from(state.max_duration_minutes) * 60
    }) {
        Some(TerminationReason::TimeLimitReached)
    } else if state.follow_up_question.is_none()
        && state.current_question_index + 1 >= state.questions_generated.len()
    {
        Some(TerminationReason::AllQuestionsCompleted)
    } else {
        None
    };

    if let Some(reason) = reason {
        tracing::info!(session_token = %state.session_token, %reason, "Interview will end");
        state.should_continue = false;
        state.termination_reason = Some(reason);
    }
    state
}

/// Promotes a pending follow-up, or advances to the next question. The
/// question index never moves for a follow-up and never passes the end of
/// the question list.
pub fn prepare_next_question(mut state: SessionState) -> SessionState {
    if let Some(follow_up) = state.follow_up_question.clone() {
        state.current_question = Some(follow_up);
        state.is_follow_up = true;
        state.follow_ups_for_current += 1;
        return state;
    }

    let total = state.questions_generated.len();
    state.current_question_index = (state.current_question_index + 1).min(total);
    state.is_follow_up = false;
    state.follow_ups_for_current = 0;

    match state.questions_generated.get(state.current_question_index) {
        Some(question) => state.current_question = Some(question.clone()),
        None => {
            state.current_question = None;
            state.should_continue = false;
            state
                .termination_reason
                .get_or_insert(TerminationReason::AllQuestionsCompleted);
        }
    }
    state
}

/// Builds the final assessment and report. Safe to run more than once: the
/// outputs are recomputed from history and the completion time is kept.
pub fn complete_interview(mut state: SessionState, now: DateTime<Utc>) -> SessionState {
    state.should_continue = false;
    state.is_active = false;
    state.follow_up_question = None;
    state.completed_at.get_or_insert(now);
    state
        .termination_reason
        .get_or_insert(TerminationReason::CompletedNormally);
    if state.status != InterviewStatus::Cancelled {
        state.status = InterviewStatus::Completed;
    }
    state.recompute_scores();

    let assessment = final_assessment(&state.responses_history);
    state.interview_report = Some(interview_report(&state, &assessment, now));
    state.final_assessment = Some(assessment);
    state
}

pub fn generate_insights(mut state: SessionState, now: DateTime<Utc>) -> SessionState {
    state.interview_insights = Some(interview_insights(&state, now));
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_state::{Evaluation, InterviewType, Question, ResponseRecord};
    use chrono::Duration;

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question::new(format!("Question {i}"), "technical", Difficulty::Medium))
            .collect()
    }

    fn session(n: usize) -> SessionState {
        let mut state = SessionState::new(
            "tok",
            1,
            Some(42),
            "Backend Engineer",
            InterviewType::Technical,
            Difficulty::Medium,
            60,
        );
        state.questions_generated = questions(n);
        initialize_session(state, Utc::now())
    }

    fn answered(mut state: SessionState, scores: &[f64]) -> SessionState {
        for score in scores {
            state.responses_history.push(ResponseRecord {
                evaluation: Evaluation {
                    overall_score: *score,
                    ..Default::default()
                },
                ..Default::default()
            });
        }
        state.latest_evaluation = state.responses_history.last().map(|r| r.evaluation.clone());
        state.recompute_scores();
        state
    }

    #[test]
    fn test_validate_session_requires_user() {
        let mut state = session(1);
        state.user_id = None;

        let state = validate_session(state);

        assert!(!state.should_continue);
        assert_eq!(state.error_message.as_deref(), Some("User not authenticated"));
    }

    #[test]
    fn test_prerequisites_fail_without_questions() {
        let state = check_prerequisites(session(0));

        assert!(!state.should_continue);
        assert!(!state.is_active);
        assert!(state.error_message.unwrap().contains("no questions"));
    }

    #[test]
    fn test_present_question_is_noop_when_terminal() {
        let mut state = session(3);
        state.should_continue = false;

        let state = present_question(state);

        assert!(state.current_question.is_none());
    }

    #[test]
    fn test_validate_response_rejects_short_text() {
        let mut state = session(1);
        state.user_response = Some("  hi  ".to_string());

        let state = validate_response(state, &WorkflowPolicy::default());

        assert!(!state.should_continue);
        assert_eq!(state.error_message.as_deref(), Some("Response too short or empty"));
    }

    #[test]
    fn test_validate_response_warns_on_brief_answer() {
        let mut state = session(1);
        state.user_response = Some("Mostly with queues.".to_string());

        let state = validate_response(state, &WorkflowPolicy::default());

        assert!(state.should_continue);
        assert!(state.warning_message.unwrap().contains("brief"));
    }

    #[test]
    fn test_calculate_score_raises_difficulty() {
        let state = answered(session(5), &[9.0]);

        let state = calculate_score(state, &WorkflowPolicy::default());

        assert_eq!(state.difficulty, Difficulty::Hard);
        assert_eq!(state.difficulty_adjustments, 1);
        assert!(state.adjustment_message.is_some());
    }

    #[test]
    fn test_calculate_score_lowers_difficulty() {
        let state = answered(session(5), &[3.0, 4.0]);

        let state = calculate_score(state, &WorkflowPolicy::default());

        assert_eq!(state.difficulty, Difficulty::Easy);
        assert_eq!(state.total_score, 7.0);
    }

    #[test]
    fn test_poor_performance_wins_over_exhaustion() {
        let mut state = answered(session(3), &[2.0, 2.0, 2.0]);
        state.current_question_index = 2;

        let state = check_termination(state, &WorkflowPolicy::default(), Utc::now());

        assert!(!state.should_continue);
        assert_eq!(
            state.termination_reason,
            Some(TerminationReason::EarlyTerminationPoorPerformance)
        );
    }

    #[test]
    fn test_excellent_performance_needs_four_turns() {
        let policy = WorkflowPolicy::default();
        let three = check_termination(answered(session(10), &[9.5; 3]), &policy, Utc::now());
        let four = check_termination(answered(session(10), &[9.5; 4]), &policy, Utc::now());

        assert!(three.should_continue);
        assert_eq!(
            four.termination_reason,
            Some(TerminationReason::EarlyTerminationExcellentPerformance)
        );
    }

    #[test]
    fn test_time_limit_reached() {
        let state = answered(session(5), &[6.0]);
        let later = state.started_at.unwrap() + Duration::minutes(61);

        let state = check_termination(state, &WorkflowPolicy::default(), later);

        assert_eq!(state.termination_reason, Some(TerminationReason::TimeLimitReached));
    }

    #[test]
    fn test_pending_follow_up_keeps_last_question_open() {
        let mut state = answered(session(2), &[5.0]);
        state.current_question_index = 1;
        state.follow_up_question = Some(Question::new("Why?", "follow_up", Difficulty::Medium));

        let state = check_termination(state, &WorkflowPolicy::default(), Utc::now());

        assert!(state.should_continue);
    }

    #[test]
    fn test_prepare_next_question_promotes_follow_up_without_moving_index() {
        let mut state = present_question(session(3));
        let follow_up = Question::new("Can you give an example?", "follow_up", Difficulty::Medium);
        state.follow_up_question = Some(follow_up.clone());

        let state = prepare_next_question(state);

        assert_eq!(state.current_question_index, 0);
        assert!(state.is_follow_up);
        assert_eq!(state.current_question, Some(follow_up));
    }

    #[test]
    fn test_prepare_next_question_caps_index_at_end() {
        let mut state = present_question(session(2));
        state.current_question_index = 1;

        let state = prepare_next_question(state);

        assert_eq!(state.current_question_index, 2);
        assert!(!state.should_continue);
        assert!(state.current_question.is_none());

        let state = prepare_next_question(state);
        assert_eq!(state.current_question_index, 2);
    }

    #[test]
    fn test_complete_interview_is_idempotent() {
        let state = answered(session(3), &[7.0, 8.0]);
        let now = Utc::now();

        let once = complete_interview(state, now);
        let twice = complete_interview(once.clone(), now + Duration::minutes(5));

        assert_eq!(once.final_assessment, twice.final_assessment);
        assert_eq!(once.interview_report, twice.interview_report);
        assert_eq!(once.completed_at, twice.completed_at);
        assert_eq!(twice.status, InterviewStatus::Completed);
        assert!(!twice.is_active);
    }

    #[test]
    fn test_complete_interview_keeps_cancelled_status() {
        let mut state = answered(session(3), &[7.0]);
        state.status = InterviewStatus::Cancelled;
        state.termination_reason = Some(TerminationReason::Cancelled("left".into()));

        let state = complete_interview(state, Utc::now());

        assert_eq!(state.status, InterviewStatus::Cancelled);
        assert!(state.final_assessment.is_some());
    }
}
