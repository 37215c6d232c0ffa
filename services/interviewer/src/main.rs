mod config;

use crate::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use interviewer_core::archive::LocalArchive;
use interviewer_core::audio::{AudioFormat, AudioPayload};
use interviewer_core::evaluator::{Evaluator, LlmEvaluator, RuleBasedEvaluator};
use interviewer_core::llm::{ChatClient, LlmConfig};
use interviewer_core::notify::LogNotifier;
use interviewer_core::prompts::PromptLibrary;
use interviewer_core::question_generator::{
    LlmQuestionGenerator, QuestionGenerator, TemplateQuestionGenerator,
};
use interviewer_core::repository::{InMemoryInterviewRepository, InterviewDefinition};
use interviewer_core::service::SubmitOutcome;
use interviewer_core::session_state::{Difficulty, InterviewType};
use interviewer_core::speech::OpenAiSpeech;
use interviewer_core::store::{FileSessionStore, InMemorySessionStore, SessionStore};
use interviewer_core::transcription::{OpenAiTranscriber, TranscriptionAdapter};
use interviewer_core::{InterviewEvent, InterviewService, InterviewWorkflow, WorkflowError};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

/// The interview this terminal session runs against.
const INTERVIEW_ID: i64 = 1;
const CANDIDATE_ID: i64 = 1;

#[derive(Parser)]
struct Cli {
    /// The role the candidate is interviewing for
    #[arg(long, default_value = "Software Engineer")]
    position: String,
    /// technical, behavioral or mixed
    #[arg(long, default_value = "technical")]
    interview_type: InterviewType,
    /// easy, medium or hard
    #[arg(long, default_value = "medium")]
    difficulty: Difficulty,
    #[arg(long)]
    title: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!(
            "{},hyper=warn,reqwest=warn",
            config.log_level
        )))
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting interviewer service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Load Prompts ---
    let prompts = match &config.prompts_dir {
        Some(dir) => PromptLibrary::from_dir(dir).context("Failed to load LLM prompts")?,
        None => PromptLibrary::builtin(),
    };
    let prompts = Arc::new(prompts);

    // --- 5. Initialize Collaborators ---
    let workflow = build_workflow(&config, prompts);

    // --- 6. Persistence and Side Channels ---
    let sessions: Arc<dyn SessionStore> = match &config.session_dir {
        Some(dir) => Arc::new(FileSessionStore::new(dir).await?),
        None => Arc::new(InMemorySessionStore::new()),
    };
    let interviews = Arc::new(InMemoryInterviewRepository::new());
    let mut interview = InterviewDefinition::new(
        INTERVIEW_ID,
        CANDIDATE_ID,
        &args.position,
        args.interview_type,
    )
    .with_difficulty(args.difficulty)
    .with_max_duration(config.policy.default_max_duration_minutes);
    if let Some(title) = &args.title {
        interview = interview.with_title(title);
    }
    interviews.insert(interview).await;

    let mut service = InterviewService::new(Arc::new(workflow), sessions, interviews)
        .with_notifier(Arc::new(LogNotifier));
    if let Some(dir) = &config.archive_dir {
        service = service.with_archive(Arc::new(LocalArchive::new(dir)));
    }

    // --- 7. Presenter ---
    // The core only decides what happens next; this task shows it.
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<InterviewEvent>(32);
    let presenter = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                InterviewEvent::AskQuestion(question) => {
                    println!("\nInterviewer: {}", question.question);
                }
                InterviewEvent::AskFollowUp(question) => {
                    println!("\nInterviewer (follow-up): {}", question.question);
                }
                InterviewEvent::Completed { reason, assessment } => {
                    println!(
                        "\nThe interview is over ({reason}). Overall score {:.1}: {}",
                        assessment.overall_score, assessment.recommendation
                    );
                }
            }
        }
    });

    // --- 8. Run the Interview ---
    let started = service
        .start(INTERVIEW_ID, CANDIDATE_ID)
        .await
        .context("Failed to start the interview")?;
    let token = started.session_token;
    tracing::info!(session_token = %token, "Interview ready");
    println!(
        "Commands: /pause /resume /repeat /skip /status /analysis /validate /cancel /end <reason> /audio <file> /quit"
    );
    event_tx
        .send(InterviewEvent::AskQuestion(started.first_question))
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let outcome = match command {
            "/quit" => break,
            "/pause" => service.pause(&token).await.map(|_| None),
            "/resume" => match service.resume(&token).await {
                Ok(presented) => {
                    event_tx.send(InterviewEvent::AskQuestion(presented.question)).await?;
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            "/repeat" => service.rephrase_question(&token).await.map(|presented| {
                println!("\nInterviewer: {}", presented.text);
                None
            }),
            "/status" => service.get_status(&token).await.map(|status| {
                println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
                None
            }),
            "/analysis" => service.analysis(&token).await.map(|analysis| {
                println!("{}", serde_json::to_string_pretty(&analysis).unwrap_or_default());
                None
            }),
            "/validate" => service.validate(&token).await.map(|validation| {
                println!("{}", serde_json::to_string_pretty(&validation).unwrap_or_default());
                None
            }),
            "/skip" => service.report_timeout(&token).await.map(Some),
            "/cancel" => service
                .cancel(&token, if rest.is_empty() { "candidate cancelled" } else { rest })
                .await
                .map(|_| None),
            "/end" => service
                .force_terminate(&token, if rest.is_empty() { "ended by interviewer" } else { rest }, None)
                .await
                .map(|_| None),
            "/audio" => match read_audio(Path::new(rest)).await {
                Ok(audio) => service.submit_response(&token, None, Some(audio)).await.map(Some),
                Err(e) => Err(e),
            },
            _ => service
                .submit_response(&token, Some(line.to_string()), None)
                .await
                .map(Some),
        };

        match outcome {
            Ok(Some(turn)) => {
                let finished = turn.is_completed;
                show_turn(&turn);
                if let Some(event) = turn.event {
                    event_tx.send(event).await?;
                }
                if finished {
                    break;
                }
            }
            Ok(None) => {}
            Err(WorkflowError::Validation(message)) => println!("Please try again: {message}"),
            Err(e) if e.is_internal() => return Err(e).context("Interview failed"),
            Err(e) => println!("{}", e.public_message()),
        }

        let status = service.get_status(&token).await?;
        if !status.should_continue {
            break;
        }
    }

    drop(event_tx);
    presenter.await?;

    match service.get_results(&token).await {
        Ok(results) => println!("{}", serde_json::to_string_pretty(&results)?),
        Err(e) => tracing::info!("No results to show: {e}"),
    }
    Ok(())
}

/// LLM-backed collaborators when an API key is configured, deterministic
/// fallbacks otherwise.
fn build_workflow(config: &Config, prompts: Arc<PromptLibrary>) -> InterviewWorkflow {
    let Some(api_key) = &config.openai_api_key else {
        tracing::warn!("OPENAI_API_KEY not set; using built-in questions and rule-based scoring");
        return InterviewWorkflow::new(
            Arc::new(RuleBasedEvaluator::new(config.policy.default_criterion_score)),
            Arc::new(TemplateQuestionGenerator),
            config.policy.clone(),
        );
    };

    let chat = Arc::new(ChatClient::new(
        LlmConfig::builder()
            .with_base_url(&config.openai_base_url)
            .with_api_key(api_key)
            .with_chat_model(&config.chat_model)
            .with_transcription_model(&config.transcription_model)
            .build(),
    ));
    let evaluator: Arc<dyn Evaluator> = Arc::new(LlmEvaluator::new(
        chat.clone(),
        prompts.clone(),
        config.policy.default_criterion_score,
    ));
    let generator: Arc<dyn QuestionGenerator> =
        Arc::new(LlmQuestionGenerator::new(chat.clone(), prompts));

    InterviewWorkflow::new(evaluator, generator, config.policy.clone())
        .with_transcription(TranscriptionAdapter::new(Arc::new(OpenAiTranscriber::new(
            chat.clone(),
        ))))
        .with_synthesizer(Arc::new(OpenAiSpeech::new(chat)))
}

/// Reads a recorded answer. `.b64` files hold base64 text; anything else is raw audio.
async fn read_audio(path: &Path) -> Result<AudioPayload, WorkflowError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        WorkflowError::Validation(format!("Cannot read {}: {e}", path.display()))
    })?;

    if extension == "b64" {
        let encoded = String::from_utf8_lossy(&bytes);
        return AudioPayload::from_base64(&encoded, None);
    }
    let declared = extension.parse::<AudioFormat>().ok();
    Ok(AudioPayload::new(bytes, declared))
}

fn show_turn(turn: &SubmitOutcome) {
    if let Some(transcript) = &turn.transcript {
        println!("You said: {transcript}");
    }
    if let Some(evaluation) = &turn.evaluation {
        println!("Score {:.1}/10. {}", evaluation.overall_score, evaluation.feedback);
    }
    for message in [&turn.warning, &turn.notice, &turn.encouragement]
        .into_iter()
        .flatten()
    {
        println!("{message}");
    }
}
