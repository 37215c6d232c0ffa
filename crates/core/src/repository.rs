use crate::session_state::{Difficulty, InterviewStatus, InterviewType};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The scheduled interview a session runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewDefinition {
    pub interview_id: i64,
    pub user_id: i64,
    pub title: String,
    pub position: String,
    pub interview_type: InterviewType,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub max_duration_minutes: u32,
    pub status: InterviewStatus,
    pub score: Option<f64>,
    pub feedback: Option<String>,
}

impl InterviewDefinition {
    pub fn new(
        interview_id: i64,
        user_id: i64,
        position: impl Into<String>,
        interview_type: InterviewType,
    ) -> Self {
        let position = position.into();
        Self {
            interview_id,
            user_id,
            title: format!("{position} interview"),
            position,
            interview_type,
            difficulty: Difficulty::default(),
            max_duration_minutes: 60,
            status: InterviewStatus::Created,
            score: None,
            feedback: None,
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_max_duration(mut self, minutes: u32) -> Self {
        self.max_duration_minutes = minutes;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

#[async_trait]
pub trait InterviewRepository: Send + Sync {
    async fn get(&self, interview_id: i64) -> Result<Option<InterviewDefinition>>;

    async fn save(&self, interview: &InterviewDefinition) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryInterviewRepository {
    interviews: RwLock<HashMap<i64, InterviewDefinition>>,
}

impl InMemoryInterviewRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, interview: InterviewDefinition) {
        self.interviews
            .write()
            .await
            .insert(interview.interview_id, interview);
    }
}

#[async_trait]
impl InterviewRepository for InMemoryInterviewRepository {
    async fn get(&self, interview_id: i64) -> Result<Option<InterviewDefinition>> {
        Ok(self.interviews.read().await.get(&interview_id).cloned())
    }

    async fn save(&self, interview: &InterviewDefinition) -> Result<()> {
        self.interviews
            .write()
            .await
            .insert(interview.interview_id, interview.clone());
        Ok(())
    }
}
