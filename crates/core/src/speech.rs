use crate::llm::ChatClient;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Turns question text into audio the runtime can play to the candidate.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns WAV bytes for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// OpenAI `/audio/speech` backend.
pub struct OpenAiSpeech {
    chat: Arc<ChatClient>,
}

impl OpenAiSpeech {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let config = self.chat.config();
        let body = serde_json::json!({
            "model": config.speech_model(),
            "voice": config.voice(),
            "input": text,
            "response_format": "wav"
        });

        let bytes = self
            .chat
            .post("audio/speech")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}
