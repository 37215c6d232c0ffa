use crate::audio::AudioFormat;
use crate::llm::ChatClient;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;

pub const TRANSCRIPTION_UNAVAILABLE: &str =
    "[Audio transcription not available - please type your response]";
pub const AUDIO_UNCLEAR: &str =
    "[Audio unclear - please speak more clearly or type your response]";
pub const TRANSCRIPTION_FAILED: &str =
    "[Audio transcription failed - please type your response]";

/// Transcripts at or below this confidence are replaced by `AUDIO_UNCLEAR`.
pub const MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// 0.0 to 1.0
    pub confidence: f64,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<Transcript>;
}

/// Wraps an optional speech-to-text backend so the workflow always gets a
/// string back. Failures and low-confidence results turn into placeholder
/// transcripts instead of errors.
#[derive(Clone)]
pub struct TranscriptionAdapter {
    backend: Option<Arc<dyn Transcriber>>,
}

impl TranscriptionAdapter {
    pub fn new(backend: Arc<dyn Transcriber>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> String {
        let Some(backend) = &self.backend else {
            return TRANSCRIPTION_UNAVAILABLE.to_string();
        };

        match backend.transcribe(audio, format).await {
            Ok(t) if t.confidence > MIN_CONFIDENCE && !t.text.trim().is_empty() => {
                t.text.trim().to_string()
            }
            Ok(t) => {
                tracing::info!(confidence = t.confidence, "Transcript below confidence threshold");
                AUDIO_UNCLEAR.to_string()
            }
            Err(e) => {
                tracing::warn!("Transcription failed: {e:#}");
                TRANSCRIPTION_FAILED.to_string()
            }
        }
    }

    pub fn is_placeholder(text: &str) -> bool {
        [TRANSCRIPTION_UNAVAILABLE, AUDIO_UNCLEAR, TRANSCRIPTION_FAILED].contains(&text)
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    avg_logprob: f64,
}

impl VerboseTranscription {
    /// Mean per-segment probability; a transcript without segments is trusted.
    fn confidence(&self) -> f64 {
        if self.segments.is_empty() {
            return 1.0;
        }
        let total: f64 = self.segments.iter().map(|s| s.avg_logprob.exp()).sum();
        (total / self.segments.len() as f64).clamp(0.0, 1.0)
    }
}

/// Whisper-compatible `/audio/transcriptions` backend.
pub struct OpenAiTranscriber {
    chat: Arc<ChatClient>,
}

impl OpenAiTranscriber {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<Transcript> {
        let part = Part::bytes(audio.to_vec())
            .file_name(format!("response.{}", format.extension()))
            .mime_str(format.mime_type())?;
        let form = Form::new()
            .text("model", self.chat.config().transcription_model().to_string())
            .text("response_format", "verbose_json")
            .text("language", "en")
            .part("file", part);

        let resp = self
            .chat
            .post("audio/transcriptions")
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<VerboseTranscription>()
            .await?;

        Ok(Transcript {
            confidence: resp.confidence(),
            text: resp.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_returning(result: Result<Transcript>) -> TranscriptionAdapter {
        let mut mock = MockTranscriber::new();
        let mut result = Some(result);
        mock.expect_transcribe().times(1).returning(move |_audio, _format| {
            let out = result.take().unwrap();
            Box::pin(async move { out })
        });
        TranscriptionAdapter::new(Arc::new(mock))
    }

    #[tokio::test]
    async fn test_confident_transcript_passes_through() {
        let adapter = adapter_returning(Ok(Transcript {
            text: "  I would shard by tenant.  ".to_string(),
            confidence: 0.93,
        }));

        let text = adapter.transcribe(b"RIFF", AudioFormat::Wav).await;

        assert_eq!(text, "I would shard by tenant.");
    }

    #[tokio::test]
    async fn test_low_confidence_becomes_placeholder() {
        let adapter = adapter_returning(Ok(Transcript {
            text: "mumble".to_string(),
            confidence: 0.5,
        }));

        let text = adapter.transcribe(b"RIFF", AudioFormat::Wav).await;

        assert_eq!(text, AUDIO_UNCLEAR);
        assert!(TranscriptionAdapter::is_placeholder(&text));
    }

    #[tokio::test]
    async fn test_backend_error_becomes_placeholder() {
        let adapter = adapter_returning(Err(anyhow::anyhow!("503 from upstream")));

        let text = adapter.transcribe(b"RIFF", AudioFormat::Wav).await;

        assert_eq!(text, TRANSCRIPTION_FAILED);
    }

    #[tokio::test]
    async fn test_missing_backend_reports_unavailable() {
        let text = TranscriptionAdapter::unavailable()
            .transcribe(b"RIFF", AudioFormat::Wav)
            .await;

        assert_eq!(text, TRANSCRIPTION_UNAVAILABLE);
    }

    #[test]
    fn test_verbose_confidence_from_logprobs() {
        let parsed: VerboseTranscription = serde_json::from_str(
            r#"{"text": "hi", "segments": [{"avg_logprob": 0.0}, {"avg_logprob": -100.0}]}"#,
        )
        .unwrap();

        assert!((parsed.confidence() - 0.5).abs() < 1e-9);
    }
}
