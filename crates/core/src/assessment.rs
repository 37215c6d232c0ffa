//! End-of-interview scoring: the final assessment, the report handed to the
//! hiring side, and process insights about the interview itself.
//!
//! Everything here is a pure function of the session's response history, so
//! re-running the completion stages on the same history yields the same result.

use crate::audio::{SpeechAnalysis, round1, round2};
use crate::session_state::{
    Difficulty, InterviewStatus, ResponseRecord, SessionState, Stage, word_count,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TECHNICAL_WEIGHT: f64 = 0.4;
const TURN_WEIGHT: f64 = 0.4;
const COMMUNICATION_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalAssessment {
    pub overall_score: f64,
    pub recommendation: String,
    pub technical_score: f64,
    pub communication_score: f64,
    pub average_response_score: f64,
    pub category_scores: BTreeMap<String, f64>,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub detailed_feedback: String,
    pub questions_answered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewReport {
    pub session_token: String,
    pub position: String,
    pub questions_presented: usize,
    pub questions_answered: usize,
    pub follow_ups_asked: usize,
    pub duration_minutes: f64,
    pub termination_reason: String,
    pub overall_score: f64,
    pub recommendation: String,
    pub next_steps: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interviewer_feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionEffectiveness {
    pub question: String,
    pub kind: String,
    pub score: f64,
    pub response_words: usize,
    pub is_follow_up: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewInsights {
    pub question_effectiveness: Vec<QuestionEffectiveness>,
    /// "improving", "declining", "stable" or "insufficient_data"
    pub performance_trend: String,
    /// Spread between the best and worst turn score.
    pub consistency: f64,
    pub best_category: Option<String>,
    pub follow_up_ratio: f64,
    pub difficulty_adjustments: u32,
    pub process_improvements: Vec<String>,
}

pub fn recommendation(score: f64) -> &'static str {
    match score {
        s if s >= 8.0 => "Strong Hire",
        s if s >= 7.0 => "Hire",
        s if s >= 6.0 => "Weak Hire",
        s if s >= 5.0 => "Weak No Hire",
        _ => "No Hire",
    }
}

pub fn next_steps(score: f64) -> Vec<String> {
    let steps: &[&str] = if score >= 8.0 {
        &[
            "Advance the candidate to the final round",
            "Share the assessment with the hiring manager",
        ]
    } else if score >= 6.0 {
        &[
            "Schedule a follow-up discussion on the weaker areas",
            "Dig into the areas for improvement in the next round",
        ]
    } else {
        &[
            "Send a respectful decline with feedback",
            "Keep the profile for roles with a closer fit",
        ]
    };
    steps.iter().map(|s| s.to_string()).collect()
}

/// Mean of every rubric criterion across all turns.
pub fn category_scores(history: &[ResponseRecord]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (criterion, score) in history.iter().flat_map(|r| &r.evaluation.detailed_analysis) {
        let entry = sums.entry(criterion.clone()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (sum, n))| (k, round1(sum / n as f64)))
        .collect()
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn pretty(criterion: &str) -> String {
    criterion.replace('_', " ")
}

pub fn final_assessment(history: &[ResponseRecord]) -> FinalAssessment {
    let Some(average) = mean(history.iter().map(|r| r.evaluation.overall_score)) else {
        return FinalAssessment {
            recommendation: "Insufficient data".to_string(),
            detailed_feedback: "No responses were recorded for this interview.".to_string(),
            ..Default::default()
        };
    };

    let categories = category_scores(history);
    let matching = |needle: &str| {
        mean(
            categories
                .iter()
                .filter(|(k, _)| k.contains(needle))
                .map(|(_, v)| *v),
        )
        .unwrap_or(average)
    };
    let technical_score = matching("technical");
    let communication_score = matching("communication");
    let overall_score = round1(
        TECHNICAL_WEIGHT * technical_score
            + TURN_WEIGHT * average
            + COMMUNICATION_WEIGHT * communication_score,
    );

    let mut strengths: Vec<String> = categories
        .iter()
        .filter(|(_, v)| **v >= 7.5)
        .map(|(k, _)| format!("Strong {}", pretty(k)))
        .collect();
    if strengths.is_empty() && average >= 7.0 {
        strengths.push("Consistently solid answers".to_string());
    }

    let mut areas_for_improvement: Vec<String> = categories
        .iter()
        .filter(|(_, v)| **v < 6.0)
        .map(|(k, _)| format!("Improve {}", pretty(k)))
        .collect();
    for improvement in history.iter().flat_map(|r| &r.evaluation.improvements) {
        if areas_for_improvement.len() >= 5 {
            break;
        }
        if !areas_for_improvement.contains(improvement) {
            areas_for_improvement.push(improvement.clone());
        }
    }

    let speech_score = mean(
        history
            .iter()
            .filter_map(|r| r.speech_analysis.as_ref())
            .map(|s| s.overall_speech_score),
    )
    .map(round1);

    let recommendation = recommendation(overall_score).to_string();
    let detailed_feedback = format!(
        "Answered {} questions with an average score of {:.1}/10. Overall assessment: {}.",
        history.len(),
        average,
        recommendation
    );

    FinalAssessment {
        overall_score,
        recommendation,
        technical_score: round1(technical_score),
        communication_score: round1(communication_score),
        average_response_score: round1(average),
        category_scores: categories,
        strengths,
        areas_for_improvement,
        detailed_feedback,
        questions_answered: history.len(),
        speech_score,
    }
}

pub fn interview_report(
    state: &SessionState,
    assessment: &FinalAssessment,
    now: DateTime<Utc>,
) -> InterviewReport {
    let end = state.completed_at.unwrap_or(now);
    let duration_minutes = state
        .started_at
        .map(|start| round1((end - start).num_seconds().max(0) as f64 / 60.0))
        .unwrap_or(0.0);

    InterviewReport {
        session_token: state.session_token.clone(),
        position: state.position.clone(),
        questions_presented: state.questions_generated.len(),
        questions_answered: state.questions_answered(),
        follow_ups_asked: state.follow_ups_asked(),
        duration_minutes,
        termination_reason: state
            .termination_reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "completed_normally".to_string()),
        overall_score: assessment.overall_score,
        recommendation: assessment.recommendation.clone(),
        next_steps: next_steps(assessment.overall_score),
        recommendations: assessment.areas_for_improvement.clone(),
        interviewer_feedback: state.manual_feedback.clone(),
    }
}

fn performance_trend(scores: &[f64]) -> &'static str {
    if scores.len() < 3 {
        return "insufficient_data";
    }
    let head = (scores[0] + scores[1]) / 2.0;
    let tail = (scores[scores.len() - 2] + scores[scores.len() - 1]) / 2.0;
    match tail - head {
        d if d > 1.0 => "improving",
        d if d < -1.0 => "declining",
        _ => "stable",
    }
}

pub fn interview_insights(state: &SessionState, now: DateTime<Utc>) -> InterviewInsights {
    let history = &state.responses_history;
    let scores: Vec<f64> = history.iter().map(|r| r.evaluation.overall_score).collect();

    let question_effectiveness = history
        .iter()
        .map(|r| QuestionEffectiveness {
            question: r.question.question.clone(),
            kind: r.question.kind.clone(),
            score: r.evaluation.overall_score,
            response_words: if r.word_count > 0 {
                r.word_count
            } else {
                word_count(&r.response)
            },
            is_follow_up: r.is_follow_up,
        })
        .collect();

    let consistency = match (
        scores.iter().copied().reduce(f64::max),
        scores.iter().copied().reduce(f64::min),
    ) {
        (Some(max), Some(min)) => round1(max - min),
        _ => 0.0,
    };

    let best_category = category_scores(history)
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k);

    let follow_up_ratio = if history.is_empty() {
        0.0
    } else {
        round1(state.follow_ups_asked() as f64 / history.len() as f64)
    };

    let mut process_improvements = Vec::new();
    if follow_up_ratio > 0.5 {
        process_improvements
            .push("Most answers needed a follow-up; consider clearer initial questions".to_string());
    }
    if history.len() < 3 {
        process_improvements
            .push("Interview ended with few answers; consider a longer question set".to_string());
    }
    if mean(scores.iter().copied()).is_some_and(|avg| avg < 5.0) {
        process_improvements
            .push("Consider a lower starting difficulty for this position".to_string());
    }
    let end = state.completed_at.unwrap_or(now);
    let overran = state
        .started_at
        .is_some_and(|start| (end - start).num_minutes() > i64::from(state.max_duration_minutes));
    if overran {
        process_improvements.push("Interview ran past its planned duration".to_string());
    }

    InterviewInsights {
        question_effectiveness,
        performance_trend: performance_trend(&scores).to_string(),
        consistency,
        best_category,
        follow_up_ratio,
        difficulty_adjustments: state.difficulty_adjustments,
        process_improvements,
    }
}

/// Turn scores bucketed into the same bands the encouragement messages use.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScoreDistribution {
    pub excellent: usize,
    pub good: usize,
    pub average: usize,
    pub poor: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub average_score: f64,
    pub total_score: f64,
    pub questions_answered: usize,
    pub performance_trend: String,
    pub current_difficulty: Difficulty,
    pub score_distribution: ScoreDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSummary {
    pub question_type: String,
    /// First 100 characters of the question.
    pub question_text: String,
    pub score: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_follow_up: bool,
    pub response_words: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionPattern {
    pub primary_emotion: String,
    pub confidence: f64,
    pub stress: f64,
    pub enthusiasm: f64,
}

/// A snapshot of how a session is going, available at any point of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAnalysis {
    pub session_token: String,
    pub status: InterviewStatus,
    pub current_step: Stage,
    pub performance: PerformanceSummary,
    pub turns: Vec<TurnSummary>,
    pub speech_quality: Vec<SpeechAnalysis>,
    pub emotion_patterns: Vec<EmotionPattern>,
    /// Present once the interview has completed.
    pub insights: Option<InterviewInsights>,
}

pub fn session_analysis(state: &SessionState) -> SessionAnalysis {
    let history = &state.responses_history;
    let scores: Vec<f64> = history.iter().map(|r| r.evaluation.overall_score).collect();

    let mut score_distribution = ScoreDistribution::default();
    for score in &scores {
        match *score {
            s if s >= 8.0 => score_distribution.excellent += 1,
            s if s >= 6.0 => score_distribution.good += 1,
            s if s >= 4.0 => score_distribution.average += 1,
            _ => score_distribution.poor += 1,
        }
    }

    let turns = history
        .iter()
        .map(|r| TurnSummary {
            question_type: r.question.kind.clone(),
            question_text: r.question.question.chars().take(100).collect(),
            score: r.evaluation.overall_score,
            timestamp: r.timestamp,
            is_follow_up: r.is_follow_up,
            response_words: if r.word_count > 0 {
                r.word_count
            } else {
                word_count(&r.response)
            },
        })
        .collect();

    let emotion_patterns = history
        .iter()
        .filter_map(|r| r.emotion_analysis.as_ref())
        .map(|e| EmotionPattern {
            primary_emotion: e.primary_emotion.clone(),
            confidence: e.score("confidence"),
            stress: e.score("stress"),
            enthusiasm: e.score("enthusiasm"),
        })
        .collect();

    SessionAnalysis {
        session_token: state.session_token.clone(),
        status: state.status,
        current_step: state.current_step,
        performance: PerformanceSummary {
            average_score: round2(mean(scores.iter().copied()).unwrap_or(0.0)),
            total_score: round2(scores.iter().sum()),
            questions_answered: history.len(),
            performance_trend: performance_trend(&scores).to_string(),
            current_difficulty: state.difficulty,
            score_distribution,
        },
        turns,
        speech_quality: history
            .iter()
            .filter_map(|r| r.speech_analysis.clone())
            .collect(),
        emotion_patterns,
        insights: state.interview_insights.clone(),
    }
}
