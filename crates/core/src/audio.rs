use crate::error::{WorkflowError, WorkflowResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Bytes per second of the reference recording format (16 kHz, 16-bit mono).
/// Used to estimate speech duration from payload size.
pub const BYTES_PER_SECOND: f64 = 16_000.0 * 2.0;

const FILLER_WORDS: [&str; 5] = ["um", "uh", "er", "like", "actually"];

const EMOTION_KEYWORDS: [(&str, &[&str]); 5] = [
    ("confidence", &["confident", "sure", "certain", "definitely", "absolutely"]),
    ("enthusiasm", &["excited", "great", "amazing", "fantastic", "love", "enjoy"]),
    ("nervousness", &["um", "uh", "nervous", "worried", "uncertain", "maybe"]),
    ("stress", &["difficult", "hard", "challenging", "struggle", "pressure"]),
    ("positivity", &["good", "excellent", "wonderful", "positive", "happy", "successful"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Webm,
    Mp3,
    Ogg,
    #[default]
    Unknown,
}

impl AudioFormat {
    /// Sniffs the container format from the leading bytes.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            Self::Wav
        } else if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
            || bytes[..bytes.len().min(50)].windows(4).any(|w| w == b"webm")
        {
            Self::Webm
        } else if bytes.starts_with(b"OggS") {
            Self::Ogg
        } else if bytes.starts_with(b"ID3")
            || (bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0)
        {
            Self::Mp3
        } else {
            Self::Unknown
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Unknown => "bin",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let name = lowered.rsplit('/').next().unwrap_or(lowered.as_str());
        let name = name.trim_start_matches("x-");
        match name.split(['-', ';']).next().unwrap_or(name) {
            "wav" | "wave" => Ok(Self::Wav),
            "webm" => Ok(Self::Webm),
            "mp3" | "mpeg" => Ok(Self::Mp3),
            "ogg" | "opus" => Ok(Self::Ogg),
            other => Err(format!("unsupported audio format '{other}'")),
        }
    }
}

/// Raw candidate audio for one turn. Never persisted.
#[derive(Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    /// Where the archive stored the recording, once it has been archived.
    pub archive_ref: Option<String>,
}

impl fmt::Debug for AudioPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPayload")
            .field("len", &self.bytes.len())
            .field("format", &self.format)
            .field("archive_ref", &self.archive_ref)
            .finish()
    }
}

impl AudioPayload {
    /// A declared format wins unless it is `Unknown`, in which case the bytes are sniffed.
    pub fn new(bytes: Vec<u8>, declared: Option<AudioFormat>) -> Self {
        let format = match declared {
            Some(format) if format != AudioFormat::Unknown => format,
            _ => AudioFormat::detect(&bytes),
        };
        Self {
            bytes,
            format,
            archive_ref: None,
        }
    }

    pub fn from_base64(encoded: &str, declared: Option<AudioFormat>) -> WorkflowResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| WorkflowError::Validation(format!("Audio is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(WorkflowError::Validation("Audio payload is empty".to_string()));
        }
        Ok(Self::new(bytes, declared))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechAnalysis {
    pub word_count: usize,
    pub estimated_duration_secs: f64,
    pub speech_rate_wpm: f64,
    pub filler_words: usize,
    pub clarity_score: f64,
    pub pace_score: f64,
    pub fluency_score: f64,
    pub overall_speech_score: f64,
    pub feedback: Vec<String>,
}

/// Derives delivery metrics from the transcript and the size of the recording.
pub fn analyze_speech(audio_len: usize, transcript: &str) -> SpeechAnalysis {
    let lowered = transcript.to_lowercase();
    let words = spoken_words(&lowered);
    let word_count = words.len();

    let estimated_duration_secs = audio_len as f64 / BYTES_PER_SECOND;
    let speech_rate_wpm = if estimated_duration_secs > 0.0 {
        word_count as f64 / estimated_duration_secs * 60.0
    } else {
        120.0
    };

    let filler_words = words.iter().filter(|w| FILLER_WORDS.contains(w)).count()
        + lowered.matches("you know").count();

    let clarity_score = (transcript.len() as f64 / 10.0).min(10.0);
    let pace_score = (10.0 - (speech_rate_wpm - 150.0).abs() / 20.0).clamp(1.0, 10.0);
    let fluency_score = (10.0 - filler_words as f64 * 2.0).max(1.0);
    let overall_speech_score = round1((clarity_score + pace_score + fluency_score) / 3.0);

    let mut feedback = Vec::new();
    if speech_rate_wpm > 180.0 {
        feedback.push("Try speaking a little slower so each point lands.".to_string());
    } else if speech_rate_wpm < 110.0 {
        feedback.push("A slightly faster pace would keep the answer flowing.".to_string());
    }
    if filler_words > 2 {
        feedback.push("Reduce filler words such as 'um' and 'like'.".to_string());
    }
    if feedback.is_empty() {
        feedback.push("Clear and well paced delivery.".to_string());
    }

    SpeechAnalysis {
        word_count,
        estimated_duration_secs: round1(estimated_duration_secs),
        speech_rate_wpm: round1(speech_rate_wpm),
        filler_words,
        clarity_score: round1(clarity_score),
        pace_score: round1(pace_score),
        fluency_score: round1(fluency_score),
        overall_speech_score,
        feedback,
    }
}

/// Emotional read of one spoken answer. Scores are 0.0 to 1.0.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionAnalysis {
    /// The highest scoring emotion, or "neutral" when no keyword matched.
    pub primary_emotion: String,
    pub confidence_level: f64,
    pub emotion_scores: BTreeMap<String, f64>,
    pub emotional_stability: f64,
    /// "positive", "negative" or "neutral"
    pub overall_tone: String,
    pub recommendations: Vec<String>,
}

impl EmotionAnalysis {
    pub fn score(&self, emotion: &str) -> f64 {
        self.emotion_scores.get(emotion).copied().unwrap_or(0.0)
    }
}

/// Estimates emotions from keyword density in the transcript. Ten keyword
/// hits per hundred words saturate an emotion at 1.0.
pub fn detect_emotions(transcript: &str) -> EmotionAnalysis {
    let lowered = transcript.to_lowercase();
    let words = spoken_words(&lowered);

    let emotion_scores: BTreeMap<String, f64> = EMOTION_KEYWORDS
        .iter()
        .map(|(emotion, keywords)| {
            let hits = words.iter().filter(|w| keywords.contains(*w)).count();
            let score = if words.is_empty() {
                0.0
            } else {
                (hits as f64 / words.len() as f64 * 10.0).min(1.0)
            };
            (emotion.to_string(), round2(score))
        })
        .collect();

    let (primary_emotion, confidence_level) = emotion_scores
        .iter()
        .fold(("neutral", 0.0), |best, (emotion, score)| {
            if *score > best.1 { (emotion.as_str(), *score) } else { best }
        });
    let primary_emotion = primary_emotion.to_string();

    let score = |emotion: &str| emotion_scores.get(emotion).copied().unwrap_or(0.0);
    let emotional_stability =
        round2((score("confidence") + (1.0 - score("nervousness")) + (1.0 - score("stress"))) / 3.0);

    let positive = score("confidence") + score("enthusiasm") + score("positivity");
    let negative = score("nervousness") + score("stress");
    let overall_tone = if positive > negative * 1.5 {
        "positive"
    } else if negative > positive * 1.5 {
        "negative"
    } else {
        "neutral"
    };

    let mut recommendations = Vec::new();
    if score("nervousness") > 0.3 {
        recommendations.push("Pause before answering to settle your nerves.".to_string());
    }
    if score("confidence") < 0.3 {
        recommendations.push("State your conclusions with more conviction.".to_string());
    }
    if score("enthusiasm") < 0.2 {
        recommendations.push("Let your interest in the work come through.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("Good emotional balance across the answer.".to_string());
    }

    EmotionAnalysis {
        primary_emotion,
        confidence_level,
        emotion_scores,
        emotional_stability,
        overall_tone: overall_tone.to_string(),
        recommendations,
    }
}

fn spoken_words(lowered: &str) -> Vec<&str> {
    lowered
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect()
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
