use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable thresholds that drive the interview workflow.
///
/// Every field has a default so a partial TOML/JSON document or a handful of
/// environment overrides is enough to build a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPolicy {
    /// Questions requested from the generator when a session starts.
    pub question_count: usize,
    /// Responses shorter than this (in characters, after trimming) are rejected.
    pub min_response_chars: usize,
    /// Below this word count the response is accepted with a warning.
    pub brief_response_words: usize,
    /// Above this word count the response is accepted with a warning.
    pub long_response_words: usize,
    /// A follow-up is generated when the score is under this value...
    pub follow_up_score_below: f64,
    /// ...or when the response has fewer words than this.
    pub follow_up_words_below: usize,
    pub max_follow_ups_per_question: u32,
    pub raise_difficulty_above: f64,
    pub lower_difficulty_below: f64,
    pub poor_performance_below: f64,
    pub poor_performance_min_turns: usize,
    pub excellent_performance_above: f64,
    pub excellent_performance_min_turns: usize,
    pub default_max_duration_minutes: u32,
    /// Wall-clock budget for one call into the workflow engine.
    pub turn_timeout_secs: u64,
    /// Hard cap on stage transitions in a single engine run.
    pub max_transitions: usize,
    /// Per-criterion score used when an evaluation leaves a rubric entry unscored.
    pub default_criterion_score: f64,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            question_count: 5,
            min_response_chars: 10,
            brief_response_words: 5,
            long_response_words: 1000,
            follow_up_score_below: 6.0,
            follow_up_words_below: 20,
            max_follow_ups_per_question: 1,
            raise_difficulty_above: 8.0,
            lower_difficulty_below: 4.0,
            poor_performance_below: 3.0,
            poor_performance_min_turns: 3,
            excellent_performance_above: 9.0,
            excellent_performance_min_turns: 4,
            default_max_duration_minutes: 60,
            turn_timeout_secs: 120,
            max_transitions: 32,
            default_criterion_score: 7.0,
        }
    }
}

impl WorkflowPolicy {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let policy: WorkflowPolicy =
            serde_json::from_str(r#"{"question_count": 3, "turn_timeout_secs": 5}"#).unwrap();

        assert_eq!(policy.question_count, 3);
        assert_eq!(policy.turn_timeout(), Duration::from_secs(5));
        assert_eq!(policy.min_response_chars, 10);
        assert_eq!(policy.max_follow_ups_per_question, 1);
    }
}
