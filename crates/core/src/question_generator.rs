use crate::llm::{ChatClient, extract_json};
use crate::prompts::{FOLLOW_UP, GENERATE_QUESTIONS, PromptLibrary};
use crate::session_state::{Difficulty, InterviewType, Question, word_count};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Criteria weights may drift this far from 1.0 before they are renormalized.
const WEIGHT_TOLERANCE: f64 = 0.1;

/// What the generator knows about the interview when it writes a follow-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUpContext {
    pub position: String,
    pub interview_type: InterviewType,
    pub difficulty: Difficulty,
    pub current_score: f64,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(
        &self,
        position: &str,
        interview_type: InterviewType,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>>;

    async fn follow_up(
        &self,
        previous: &Question,
        response: &str,
        context: &FollowUpContext,
    ) -> Result<Question>;
}

/// Keeps rubric weights usable: an empty rubric becomes `{"overall": 1.0}`,
/// non-positive totals become equal weights, and totals outside the
/// tolerance are rescaled to sum to 1.0.
pub fn normalize_criteria(criteria: &mut BTreeMap<String, f64>) {
    criteria.retain(|_, weight| weight.is_finite() && *weight >= 0.0);
    if criteria.is_empty() {
        criteria.insert("overall".to_string(), 1.0);
        return;
    }
    let sum: f64 = criteria.values().sum();
    if sum <= 0.0 {
        let equal = 1.0 / criteria.len() as f64;
        criteria.values_mut().for_each(|w| *w = equal);
    } else if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        criteria.values_mut().for_each(|w| *w /= sum);
    }
}

fn template(question: String, kind: &str, points: &[&str], criteria: &[(&str, f64)]) -> Question {
    Question::new(question, kind, Difficulty::Medium)
        .with_expected_points(points.iter().copied())
        .with_criteria(criteria.iter().copied())
}

/// Built-in question bank used when the generator backend is unavailable.
/// Returns at most `count` questions.
pub fn fallback_questions(
    position: &str,
    interview_type: InterviewType,
    difficulty: Difficulty,
    count: usize,
) -> Vec<Question> {
    let base = match interview_type {
        InterviewType::Technical => vec![
            template(
                format!("Tell me about your experience as a {position} and the technologies you have worked with."),
                "experience",
                &["Experience", "Technologies", "Projects", "Challenges"],
                &[("technical_knowledge", 0.6), ("communication", 0.4)],
            ),
            template(
                format!("Describe a challenging problem you solved as a {position}. Walk me through your approach."),
                "problem_solving",
                &["Problem description", "Solution approach", "Implementation", "Results"],
                &[("problem_solving", 0.7), ("technical_depth", 0.3)],
            ),
            template(
                format!("How do you keep code quality and maintainability high in {position} projects?"),
                "best_practices",
                &["Code review", "Testing", "Documentation", "Standards"],
                &[("technical_knowledge", 0.5), ("best_practices", 0.5)],
            ),
            template(
                format!("How would you design a scalable system for a {} application?", position.to_lowercase()),
                "system_design",
                &["Architecture", "Scalability", "Performance", "Trade-offs"],
                &[("system_design", 0.8), ("technical_depth", 0.2)],
            ),
            template(
                format!("How do you keep up with new {position} technologies and trends?"),
                "learning",
                &["Learning resources", "Community involvement", "Experimentation"],
                &[("learning_mindset", 0.6), ("technical_awareness", 0.4)],
            ),
        ],
        InterviewType::Behavioral => vec![
            template(
                "Tell me about a time you worked with a difficult team member. How did you handle it?".to_string(),
                "teamwork",
                &["Situation", "Action", "Communication", "Result"],
                &[("teamwork", 0.5), ("communication", 0.3), ("conflict_resolution", 0.2)],
            ),
            template(
                "Describe a project where you had to learn something new quickly. How did you approach it?".to_string(),
                "adaptability",
                &["Learning approach", "Resources used", "Timeline", "Outcome"],
                &[("adaptability", 0.6), ("learning_ability", 0.4)],
            ),
            template(
                "Tell me about a difficult decision you made with limited information.".to_string(),
                "decision_making",
                &["Context", "Decision process", "Risk assessment", "Outcome"],
                &[("decision_making", 0.7), ("analytical_thinking", 0.3)],
            ),
            template(
                "Describe a time you led a project or initiative. What was your approach?".to_string(),
                "leadership",
                &["Leadership style", "Planning", "Team motivation", "Results"],
                &[("leadership", 0.6), ("project_management", 0.4)],
            ),
            template(
                "Tell me about a time you received criticism. What did you do with it?".to_string(),
                "feedback",
                &["Reception", "Reflection", "Action taken", "Growth"],
                &[("emotional_intelligence", 0.5), ("growth_mindset", 0.5)],
            ),
        ],
        InterviewType::Mixed => vec![
            template(
                format!("Tell me about your experience as a {position} and how you have grown in the role."),
                "experience_growth",
                &["Technical experience", "Career progression", "Learning", "Goals"],
                &[("technical_knowledge", 0.4), ("career_growth", 0.3), ("communication", 0.3)],
            ),
            template(
                format!("Describe a {position} project that did not go as planned. How did you handle it?"),
                "problem_resolution",
                &["Problem identification", "Technical solutions", "Team dynamics", "Learning"],
                &[("problem_solving", 0.4), ("adaptability", 0.3), ("technical_skills", 0.3)],
            ),
            template(
                format!("How do you balance technical debt against feature work in {position} projects?"),
                "technical_management",
                &["Technical understanding", "Prioritization", "Communication", "Strategy"],
                &[("technical_knowledge", 0.5), ("strategic_thinking", 0.3), ("communication", 0.2)],
            ),
        ],
    };

    base.into_iter()
        .take(count)
        .map(|mut q| {
            q.question = adjust_for_difficulty(&q.question, difficulty);
            q.difficulty = difficulty;
            q
        })
        .collect()
}

fn adjust_for_difficulty(text: &str, difficulty: Difficulty) -> String {
    match difficulty {
        Difficulty::Easy => text.replace("challenging", "simple").replace("complex", "basic"),
        Difficulty::Hard => text.replace("scalable system", "highly scalable, distributed system"),
        Difficulty::Medium => text.to_string(),
    }
}

/// Picks a canned follow-up that fits the shape of the answer.
pub fn fallback_follow_up(previous: &Question, response: &str, context: &FollowUpContext) -> Question {
    let text = if word_count(response) < 20 {
        "Can you give me a specific example of that?"
    } else if context.current_score < 4.0 {
        "How did you overcome the challenges you mentioned?"
    } else if context.interview_type == InterviewType::Technical {
        "Which technologies did you use for that, and why?"
    } else {
        "How would you approach this differently now?"
    };
    let excerpt: String = previous.question.chars().take(50).collect();

    Question::new(text, "follow_up", context.difficulty)
        .with_expected_points(previous.expected_points.iter().cloned())
        .with_criteria([("depth", 0.5), ("specificity", 0.5)])
        .with_context(format!("Following up on: {excerpt}..."))
}

/// Deterministic generator backed by the built-in question bank.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateQuestionGenerator;

#[async_trait]
impl QuestionGenerator for TemplateQuestionGenerator {
    async fn generate(
        &self,
        position: &str,
        interview_type: InterviewType,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>> {
        Ok(fallback_questions(position, interview_type, difficulty, count))
    }

    async fn follow_up(
        &self,
        previous: &Question,
        response: &str,
        context: &FollowUpContext,
    ) -> Result<Question> {
        Ok(fallback_follow_up(previous, response, context))
    }
}

/// Parses generated questions from a model reply. Accepts a bare array or an
/// object with a `questions` array; entries without question text are dropped.
pub fn parse_questions(raw: &str, interview_type: InterviewType, difficulty: Difficulty) -> Result<Vec<Question>> {
    let value = extract_json(raw)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => anyhow::bail!("Question JSON has no 'questions' array"),
        },
        other => anyhow::bail!("Question JSON is neither an array nor an object: {other}"),
    };

    let questions = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Question>(item).ok())
        .filter(|q| !q.question.trim().is_empty())
        .map(|mut q| {
            if q.kind.is_empty() {
                q.kind = interview_type.to_string();
            }
            q.difficulty = difficulty;
            if q.expected_points.is_empty() {
                q.expected_points.push("General response".to_string());
            }
            normalize_criteria(&mut q.evaluation_criteria);
            q
        })
        .collect();
    Ok(questions)
}

pub struct LlmQuestionGenerator {
    chat: Arc<ChatClient>,
    prompts: Arc<PromptLibrary>,
}

impl LlmQuestionGenerator {
    pub fn new(chat: Arc<ChatClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { chat, prompts }
    }

    async fn generate_remote(
        &self,
        position: &str,
        interview_type: InterviewType,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>> {
        let count_str = count.to_string();
        let prompt = self.prompts.render(
            GENERATE_QUESTIONS,
            &[
                ("position", position),
                ("interview_type", interview_type.as_str()),
                ("difficulty", difficulty.as_str()),
                ("count", &count_str),
            ],
        )?;
        let answer = self.chat.complete(&prompt, true, 0.7).await?;
        parse_questions(&answer, interview_type, difficulty)
    }

    async fn follow_up_remote(
        &self,
        previous: &Question,
        response: &str,
        context: &FollowUpContext,
    ) -> Result<Question> {
        let score = format!("{:.1}", context.current_score);
        let prompt = self.prompts.render(
            FOLLOW_UP,
            &[
                ("position", &context.position),
                ("interview_type", context.interview_type.as_str()),
                ("difficulty", context.difficulty.as_str()),
                ("current_score", &score),
                ("question", &previous.question),
                ("response", response),
            ],
        )?;
        let answer = self.chat.complete(&prompt, true, 0.5).await?;
        let mut question: Question = serde_json::from_value(extract_json(&answer)?)
            .context("Follow-up JSON has an unexpected shape")?;
        anyhow::ensure!(
            !question.question.trim().is_empty(),
            "Follow-up JSON has no question text"
        );
        question.kind = "follow_up".to_string();
        question.difficulty = context.difficulty;
        if question.expected_points.is_empty() {
            question.expected_points = previous.expected_points.clone();
        }
        normalize_criteria(&mut question.evaluation_criteria);
        Ok(question)
    }
}

#[async_trait]
impl QuestionGenerator for LlmQuestionGenerator {
    /// Tops up a short model answer from the built-in bank so the caller
    /// receives `count` questions whenever the bank has enough.
    async fn generate(
        &self,
        position: &str,
        interview_type: InterviewType,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>> {
        let mut questions = match self
            .generate_remote(position, interview_type, difficulty, count)
            .await
        {
            Ok(questions) => questions,
            Err(e) => {
                tracing::warn!("Question generation failed, using built-in questions: {e:#}");
                Vec::new()
            }
        };
        questions.truncate(count);

        if questions.len() < count {
            let missing = count - questions.len();
            let extra: Vec<Question> = fallback_questions(position, interview_type, difficulty, count)
                .into_iter()
                .filter(|fb| !questions.iter().any(|q| q.question == fb.question))
                .take(missing)
                .collect();
            questions.extend(extra);
        }
        Ok(questions)
    }

    async fn follow_up(
        &self,
        previous: &Question,
        response: &str,
        context: &FollowUpContext,
    ) -> Result<Question> {
        match self.follow_up_remote(previous, response, context).await {
            Ok(question) => Ok(question),
            Err(e) => {
                tracing::warn!("Follow-up generation failed, using canned follow-up: {e:#}");
                Ok(fallback_follow_up(previous, response, context))
            }
        }
    }
}
