use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

pub struct LlmConfig {
    base_url: String,
    api_key: SecretString,
    chat_model: String,
    transcription_model: String,
    speech_model: String,
    voice: String,
}

pub struct LlmConfigBuilder {
    config: LlmConfig,
}

impl Default for LlmConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LlmConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.config.chat_model = model.to_string();
        self
    }

    pub fn with_transcription_model(mut self, model: &str) -> Self {
        self.config.transcription_model = model.to_string();
        self
    }

    pub fn with_speech_model(mut self, model: &str, voice: &str) -> Self {
        self.config.speech_model = model.to_string();
        self.config.voice = voice.to_string();
        self
    }

    pub fn build(self) -> LlmConfig {
        self.config
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: SecretString::from(String::new()),
            chat_model: "gpt-4o".to_string(),
            transcription_model: "whisper-1".to_string(),
            speech_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
        }
    }
}

impl LlmConfig {
    pub fn builder() -> LlmConfigBuilder {
        LlmConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn transcription_model(&self) -> &str {
        &self.transcription_model
    }

    pub fn speech_model(&self) -> &str {
        &self.speech_model
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

/// Thin OpenAI-compatible HTTP client shared by the evaluator, the question
/// generator, the transcriber and the speech synthesizer.
pub struct ChatClient {
    client: Client,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// An authenticated POST to `{base_url}/{path}`.
    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}/{}", self.config.base_url, path))
            .bearer_auth(self.config.api_key.expose_secret())
    }

    /// Sends a single user message and returns the first choice's content.
    pub async fn complete(&self, prompt: &str, json_mode: bool, temperature: f32) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.config.chat_model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": temperature
        });
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let resp = self
            .post("chat/completions")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        let answer = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content;
        Ok(answer)
    }
}

/// Pulls the JSON document out of a model reply, tolerating markdown code
/// fences and chatter around the payload.
pub fn extract_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let unfenced = match trimmed.find("```") {
        Some(start) => {
            let after = &trimmed[start + 3..];
            let body = after.strip_prefix("json").unwrap_or(after);
            match body.find("```") {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => trimmed,
    };

    if let Ok(value) = serde_json::from_str(unfenced.trim()) {
        return Ok(value);
    }

    let start = unfenced
        .find(['{', '['])
        .context("LLM output contains no JSON document")?;
    let end = unfenced
        .rfind(['}', ']'])
        .filter(|end| *end > start)
        .context("LLM output contains an unterminated JSON document")?;
    serde_json::from_str(&unfenced[start..=end])
        .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let raw = "Here you go:\n```json\n{\"overall_score\": 7.5}\n```\nThanks";

        let value = extract_json(raw).unwrap();

        assert_eq!(value["overall_score"], 7.5);
    }

    #[test]
    fn test_extract_json_from_surrounding_prose() {
        let raw = "Sure! [{\"question\": \"Why Rust?\"}] Hope that helps.";

        let value = extract_json(raw).unwrap();

        assert_eq!(value[0]["question"], "Why Rust?");
    }

    #[test]
    fn test_extract_json_rejects_plain_text() {
        assert!(extract_json("I cannot help with that.").is_err());
    }

    #[test]
    fn test_builder_overrides_defaults() {
        let config = LlmConfig::builder()
            .with_base_url("http://localhost:8080/v1/")
            .with_chat_model("gpt-4o-mini")
            .with_api_key("sk-test")
            .build();

        assert_eq!(config.base_url(), "http://localhost:8080/v1");
        assert_eq!(config.chat_model(), "gpt-4o-mini");
        assert_eq!(config.transcription_model(), "whisper-1");
        assert_eq!(config.api_key().expose_secret(), "sk-test");
    }

    #[tokio::test]
    #[ignore] // This test makes a real network call and requires an API key.
    async fn test_live_completion_returns_json() {
        dotenvy::dotenv_override().ok();
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");
        let client = ChatClient::new(LlmConfig::builder().with_api_key(&api_key).build());

        let answer = client
            .complete("Reply with the JSON object {\"ok\": true}", true, 0.0)
            .await
            .unwrap();

        assert_eq!(extract_json(&answer).unwrap()["ok"], true);
    }
}
