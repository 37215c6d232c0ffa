use crate::audio::round1;
use crate::coverage::{PointMatcher, count_markers};
use crate::llm::{ChatClient, extract_json};
use crate::prompts::{ANALYZE_DEPTH, EVALUATE_RESPONSE, PromptLibrary};
use crate::session_state::{
    DepthAnalysis, Evaluation, InterviewType, Question, StarCoverage, word_count,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const SITUATION_MARKERS: [&str; 6] = [
    "situation",
    "when i was",
    "at my previous",
    "context",
    "background",
    "we were",
];
const TASK_MARKERS: [&str; 6] = [
    "task",
    "goal",
    "responsible",
    "needed to",
    "objective",
    "my role",
];
const ACTION_MARKERS: [&str; 8] = [
    "i decided",
    "i implemented",
    "i built",
    "i led",
    "i worked",
    "i created",
    "i proposed",
    "action",
];
const RESULT_MARKERS: [&str; 7] = [
    "result",
    "outcome",
    "improved",
    "reduced",
    "increased",
    "achieved",
    "delivered",
];

/// Scores a candidate answer against a question's expected points and rubric.
///
/// Implementations may call out to a model; callers treat any `Err` as a
/// degraded turn and fall back to `RuleBasedEvaluator`.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        question: &str,
        response: &str,
        expected_points: &[String],
        rubric: &BTreeMap<String, f64>,
    ) -> Result<Evaluation>;

    async fn analyze_depth(
        &self,
        question: &Question,
        response: &str,
        interview_type: InterviewType,
    ) -> Result<DepthAnalysis>;
}

/// Deterministic scorer used when no model is configured or a model call fails.
pub struct RuleBasedEvaluator {
    matcher: PointMatcher,
    default_criterion_score: f64,
}

impl Default for RuleBasedEvaluator {
    fn default() -> Self {
        Self::new(7.0)
    }
}

impl RuleBasedEvaluator {
    pub fn new(default_criterion_score: f64) -> Self {
        Self {
            matcher: PointMatcher::new(),
            default_criterion_score,
        }
    }

    /// Half the scale is awarded for answering at all; the other half scales
    /// with how many expected points the answer mentions. Without expected
    /// points the answer's length stands in for coverage.
    pub fn score(
        &self,
        response: &str,
        expected_points: &[String],
        rubric: &BTreeMap<String, f64>,
    ) -> Evaluation {
        let words = word_count(response);
        let covered = self.matcher.covered(response, expected_points);
        let ratio = if expected_points.is_empty() {
            (words as f64 / 50.0).min(1.0)
        } else {
            covered.len() as f64 / expected_points.len() as f64
        };
        let overall_score = round1(10.0 * (0.5 + 0.5 * ratio));

        let mut detailed_analysis: BTreeMap<String, f64> = rubric
            .keys()
            .map(|criterion| (criterion.clone(), self.default_criterion_score))
            .collect();
        detailed_analysis.insert("completeness".to_string(), overall_score);

        let missed: Vec<&String> = expected_points
            .iter()
            .filter(|p| !covered.contains(p))
            .collect();
        let feedback = if expected_points.is_empty() {
            format!("Thank you for your answer ({words} words).")
        } else {
            format!(
                "You covered {} of {} key points.",
                covered.len(),
                expected_points.len()
            )
        };
        let mut improvements: Vec<String> =
            missed.iter().map(|p| format!("Address: {p}")).collect();
        if improvements.is_empty() && words < 50 {
            improvements.push("Support your answer with a concrete example.".to_string());
        }

        Evaluation {
            overall_score,
            feedback,
            detailed_analysis,
            improvements,
            fallback: true,
        }
    }

    pub fn depth(
        &self,
        question: &Question,
        response: &str,
        interview_type: InterviewType,
    ) -> DepthAnalysis {
        let words = word_count(response);
        let wants_star = matches!(interview_type, InterviewType::Behavioral | InterviewType::Mixed)
            || question.kind == "behavioral";
        let star = wants_star.then(|| StarCoverage {
            situation: count_markers(response, &SITUATION_MARKERS) > 0,
            task: count_markers(response, &TASK_MARKERS) > 0,
            action: count_markers(response, &ACTION_MARKERS) > 0,
            result: count_markers(response, &RESULT_MARKERS) > 0,
        });

        let mut depth_score = (2.0 + words as f64 / 20.0).min(8.0);
        if let Some(star) = &star {
            depth_score += star.covered() as f64 * 0.5;
        }

        let complexity_level = match words {
            0..40 => "basic",
            40..120 => "intermediate",
            _ => "advanced",
        };

        let mut strengths = Vec::new();
        let mut gaps = Vec::new();
        if words >= 40 {
            strengths.push("Answer is developed in detail".to_string());
        } else {
            gaps.push("Answer lacks detail".to_string());
        }
        if let Some(star) = &star {
            for (present, part) in [
                (star.situation, "situation"),
                (star.task, "task"),
                (star.action, "action"),
                (star.result, "result"),
            ] {
                if present {
                    strengths.push(format!("Describes the {part}"));
                } else {
                    gaps.push(format!("No clear {part}"));
                }
            }
        }

        DepthAnalysis {
            depth_score: round1(depth_score.min(10.0)),
            complexity_level: complexity_level.to_string(),
            strengths,
            gaps,
            star,
            fallback: true,
        }
    }
}

#[async_trait]
impl Evaluator for RuleBasedEvaluator {
    async fn evaluate(
        &self,
        _question: &str,
        response: &str,
        expected_points: &[String],
        rubric: &BTreeMap<String, f64>,
    ) -> Result<Evaluation> {
        Ok(self.score(response, expected_points, rubric))
    }

    async fn analyze_depth(
        &self,
        question: &Question,
        response: &str,
        interview_type: InterviewType,
    ) -> Result<DepthAnalysis> {
        Ok(self.depth(question, response, interview_type))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EvaluationPayload {
    overall_score: Option<f64>,
    feedback: String,
    detailed_analysis: BTreeMap<String, f64>,
    improvements: Vec<String>,
}

/// Turns a model reply into an `Evaluation`, clamping scores to 0..=10 and
/// filling unscored rubric criteria with `default_criterion_score`.
pub fn parse_evaluation(
    raw: &str,
    rubric: &BTreeMap<String, f64>,
    default_criterion_score: f64,
) -> Result<Evaluation> {
    let payload: EvaluationPayload = serde_json::from_value(extract_json(raw)?)
        .context("Evaluation JSON has an unexpected shape")?;
    let overall_score = payload
        .overall_score
        .context("Evaluation JSON is missing overall_score")?
        .clamp(0.0, 10.0);

    let mut detailed_analysis: BTreeMap<String, f64> = payload
        .detailed_analysis
        .into_iter()
        .map(|(k, v)| (k, v.clamp(0.0, 10.0)))
        .collect();
    for criterion in rubric.keys() {
        detailed_analysis
            .entry(criterion.clone())
            .or_insert(default_criterion_score);
    }

    Ok(Evaluation {
        overall_score: round1(overall_score),
        feedback: payload.feedback,
        detailed_analysis,
        improvements: payload.improvements,
        fallback: false,
    })
}

pub struct LlmEvaluator {
    chat: Arc<ChatClient>,
    prompts: Arc<PromptLibrary>,
    fallback: RuleBasedEvaluator,
}

impl LlmEvaluator {
    pub fn new(chat: Arc<ChatClient>, prompts: Arc<PromptLibrary>, default_criterion_score: f64) -> Self {
        Self {
            chat,
            prompts,
            fallback: RuleBasedEvaluator::new(default_criterion_score),
        }
    }

    async fn evaluate_remote(
        &self,
        question: &str,
        response: &str,
        expected_points: &[String],
        rubric: &BTreeMap<String, f64>,
    ) -> Result<Evaluation> {
        let points = if expected_points.is_empty() {
            "(none specified)".to_string()
        } else {
            expected_points
                .iter()
                .map(|p| format!("- {p}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let criteria = rubric
            .iter()
            .map(|(name, weight)| format!("- {name}: {weight:.2}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self.prompts.render(
            EVALUATE_RESPONSE,
            &[
                ("question", question),
                ("expected_points", &points),
                ("criteria", &criteria),
                ("response", response),
            ],
        )?;

        let answer = self.chat.complete(&prompt, true, 0.1).await?;
        parse_evaluation(&answer, rubric, self.fallback.default_criterion_score)
    }

    async fn depth_remote(
        &self,
        question: &Question,
        response: &str,
        interview_type: InterviewType,
    ) -> Result<DepthAnalysis> {
        let prompt = self.prompts.render(
            ANALYZE_DEPTH,
            &[
                ("question", &question.question),
                ("response", response),
                ("interview_type", interview_type.as_str()),
            ],
        )?;
        let answer = self.chat.complete(&prompt, true, 0.2).await?;
        let mut analysis: DepthAnalysis = serde_json::from_value(extract_json(&answer)?)
            .context("Depth analysis JSON has an unexpected shape")?;
        analysis.depth_score = round1(analysis.depth_score.clamp(0.0, 10.0));
        analysis.fallback = false;
        Ok(analysis)
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        question: &str,
        response: &str,
        expected_points: &[String],
        rubric: &BTreeMap<String, f64>,
    ) -> Result<Evaluation> {
        match self
            .evaluate_remote(question, response, expected_points, rubric)
            .await
        {
            Ok(evaluation) => Ok(evaluation),
            Err(e) => {
                tracing::warn!("LLM evaluation failed, using rule-based score: {e:#}");
                Ok(self.fallback.score(response, expected_points, rubric))
            }
        }
    }

    async fn analyze_depth(
        &self,
        question: &Question,
        response: &str,
        interview_type: InterviewType,
    ) -> Result<DepthAnalysis> {
        match self.depth_remote(question, response, interview_type).await {
            Ok(analysis) => Ok(analysis),
            Err(e) => {
                tracing::warn!("LLM depth analysis failed, using heuristics: {e:#}");
                Ok(self.fallback.depth(question, response, interview_type))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_state::Difficulty;

    fn rubric() -> BTreeMap<String, f64> {
        [("technical_accuracy".to_string(), 0.6), ("communication".to_string(), 0.4)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_rule_based_score_scales_with_coverage() {
        let evaluator = RuleBasedEvaluator::default();
        let points = vec![
            "Testing".to_string(),
            "Code review".to_string(),
            "Documentation".to_string(),
        ];

        let evaluation = evaluator.score(
            "We rely on unit testing and careful code reviews for every change.",
            &points,
            &rubric(),
        );

        assert_eq!(evaluation.overall_score, 8.3);
        assert!(evaluation.fallback);
        assert_eq!(evaluation.detailed_analysis["technical_accuracy"], 7.0);
        assert_eq!(evaluation.improvements, vec!["Address: Documentation".to_string()]);
    }

    #[test]
    fn test_rule_based_score_without_points_uses_length() {
        let evaluator = RuleBasedEvaluator::default();

        let evaluation = evaluator.score("short answer here", &[], &BTreeMap::new());

        assert_eq!(evaluation.overall_score, 5.3);
        assert_eq!(evaluation.detailed_analysis.len(), 1);
    }

    #[test]
    fn test_parse_evaluation_fills_missing_criteria_and_clamps() {
        let raw = r#"```json
        {"overall_score": 12, "feedback": "Great", "detailed_analysis": {"communication": 8}, "improvements": []}
        ```"#;

        let evaluation = parse_evaluation(raw, &rubric(), 7.0).unwrap();

        assert_eq!(evaluation.overall_score, 10.0);
        assert_eq!(evaluation.detailed_analysis["communication"], 8.0);
        assert_eq!(evaluation.detailed_analysis["technical_accuracy"], 7.0);
        assert!(!evaluation.fallback);
    }

    #[test]
    fn test_parse_evaluation_requires_a_score() {
        let result = parse_evaluation(r#"{"feedback": "no score"}"#, &rubric(), 7.0);

        assert!(result.is_err());
    }

    #[test]
    fn test_depth_fallback_checks_star_structure() {
        let evaluator = RuleBasedEvaluator::default();
        let question = Question::new("Tell me about a conflict.", "behavioral", Difficulty::Medium);

        let analysis = evaluator.depth(
            &question,
            "The situation was a missed deadline. I decided to split the work and as a result we shipped.",
            InterviewType::Mixed,
        );

        let star = analysis.star.unwrap();
        assert!(star.situation && star.action && star.result);
        assert!(!star.task);
        assert_eq!(analysis.complexity_level, "basic");
        assert!(analysis.gaps.contains(&"No clear task".to_string()));
    }

    #[test]
    fn test_depth_fallback_skips_star_for_technical() {
        let evaluator = RuleBasedEvaluator::default();
        let question = Question::new("Explain B-trees.", "technical", Difficulty::Hard);

        let analysis = evaluator.depth(&question, "They are balanced trees.", InterviewType::Technical);

        assert!(analysis.star.is_none());
    }

    #[test]
    fn test_depth_fallback_mixed_session_checks_star_on_technical_question() {
        let evaluator = RuleBasedEvaluator::default();
        let question = Question::new("How would you shard this table?", "technical", Difficulty::Medium);

        let analysis = evaluator.depth(
            &question,
            "In my last role the situation was a table that outgrew one node, so I split it by tenant.",
            InterviewType::Mixed,
        );

        let star = analysis.star.unwrap();
        assert!(star.situation);
        assert!(!star.result);
    }

    #[tokio::test]
    async fn test_llm_evaluator_falls_back_when_backend_unreachable() {
        let chat = ChatClient::new(
            crate::llm::LlmConfig::builder()
                .with_base_url("http://127.0.0.1:9")
                .with_api_key("sk-test")
                .build(),
        );
        let evaluator = LlmEvaluator::new(Arc::new(chat), Arc::new(PromptLibrary::builtin()), 7.0);

        let evaluation = evaluator
            .evaluate("Q?", "A reasonably complete answer", &[], &BTreeMap::new())
            .await
            .unwrap();

        assert!(evaluation.fallback);
    }

    #[tokio::test]
    #[ignore] // This test makes a real network call and requires an API key.
    async fn test_live_evaluation_scores_answer() {
        dotenvy::dotenv_override().ok();
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");
        let chat = ChatClient::new(crate::llm::LlmConfig::builder().with_api_key(&api_key).build());
        let evaluator = LlmEvaluator::new(Arc::new(chat), Arc::new(PromptLibrary::builtin()), 7.0);

        let evaluation = evaluator
            .evaluate(
                "What is a race condition?",
                "Two threads access shared data without synchronization and the outcome depends on timing.",
                &["Shared state".to_string(), "Timing dependence".to_string()],
                &rubric(),
            )
            .await
            .unwrap();

        assert!(!evaluation.fallback);
        assert!(evaluation.overall_score > 5.0);
    }
}
