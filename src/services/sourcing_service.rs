//! Question sourcing: reuse questions from the bank, generate fresh ones with the AI provider,
//! and race both sources for a match.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::future::{self, Either};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::oneshot,
    task::{JoinError, JoinHandle},
    time::{Instant, timeout, timeout_at},
};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{models::QuestionEntity, question_bank::QuestionBank, session_store::SessionStore},
    error::{ErrorKind, ServiceError},
    services::{
        ai_provider::{ChatProvider, ChatRequest, ProviderError},
        records::{self, Change},
    },
    state::SharedState,
};

/// Where a batch of questions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    Bank,
    Ai,
}

impl QuestionSource {
    fn label(self) -> &'static str {
        match self {
            QuestionSource::Bank => "bank",
            QuestionSource::Ai => "ai",
        }
    }
}

/// What a match needs questions for.
#[derive(Debug, Clone)]
pub struct SourcingRequest {
    pub match_id: String,
    pub topic: String,
    /// Number of AI questions to generate.
    pub count: usize,
    /// Difficulty in `1..=10`, also used to pick bank questions.
    pub level: u8,
}

/// Provenance bookkeeping touched fewer rows than questions it was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProvenanceWarning {
    pub source: QuestionSource,
    pub expected: u64,
    pub actual: u64,
}

/// Result of sourcing questions for a match.
#[derive(Debug, Clone)]
pub struct SourcingReport {
    /// Source that delivered first.
    pub source: QuestionSource,
    pub questions: Vec<QuestionEntity>,
    pub other_source: QuestionSource,
    /// Questions of the slower source; empty when it failed or missed its deadline.
    pub other_questions: Vec<QuestionEntity>,
    /// Questions stored on the match once both sources settled.
    pub total_questions: usize,
    pub warnings: Vec<ProvenanceWarning>,
}

/// Least used bank questions for `level`.
pub async fn bank_questions(
    bank: Arc<dyn QuestionBank>,
    level: u8,
    limit: usize,
) -> Result<Vec<QuestionEntity>, ServiceError> {
    let questions = bank.fetch_by_level(level, limit).await?;
    if questions.is_empty() {
        return Err(ServiceError::NoQuestionsAvailable { level });
    }
    debug!(level, count = questions.len(), "fetched questions from the bank");
    Ok(questions)
}

/// Ask the generation model for `count` questions, one per call.
///
/// Empty, undecodable, rejected or unparseable completions are discarded and retried, up to
/// `count * generation_attempts_per_question` calls in total. A timed out or unreachable
/// provider ends the batch.
pub async fn generate_questions(
    chat: Arc<dyn ChatProvider>,
    config: Arc<AppConfig>,
    topic: String,
    count: usize,
    level: u8,
) -> Result<Vec<QuestionEntity>, ServiceError> {
    if count == 0 {
        return Err(ServiceError::InvalidInput("count must be positive".into()));
    }

    let max_attempts = u32::try_from(count)
        .unwrap_or(u32::MAX)
        .saturating_mul(config.generation_attempts_per_question);
    let mut accepted = Vec::with_capacity(count);
    let mut attempts = 0;

    while accepted.len() < count && attempts < max_attempts {
        attempts += 1;
        let completion = match chat
            .complete(ChatRequest {
                model: config.ai.generation_model.clone(),
                prompt: generation_prompt(&config.ai.reference_corpus, &topic, level),
            })
            .await
        {
            Ok(completion) => completion,
            Err(err @ (ProviderError::Timeout | ProviderError::Transport { .. })) => {
                return Err(err.into());
            }
            Err(err) => {
                debug!(attempt = attempts, error = %err, "discarding failed generation");
                continue;
            }
        };

        match parse_generated(&completion) {
            Some(mut question) => {
                if question.level == 0 {
                    question.level = level;
                }
                if question.topic.is_empty() {
                    question.topic = topic.clone();
                }
                accepted.push(question);
            }
            None => debug!(attempt = attempts, "discarding unparseable generation"),
        }
    }

    if accepted.is_empty() {
        return Err(ServiceError::GenerationExhausted {
            requested: count,
            accepted: 0,
            attempts,
        });
    }
    if accepted.len() < count {
        warn!(
            requested = count,
            accepted = accepted.len(),
            attempts,
            "generation attempts exhausted; continuing with a partial batch"
        );
    }

    Ok(accepted)
}

/// Have the verification model check and correct a batch of questions.
pub async fn verify_questions(
    chat: Arc<dyn ChatProvider>,
    config: Arc<AppConfig>,
    questions: Vec<QuestionEntity>,
) -> Result<Vec<QuestionEntity>, ServiceError> {
    if questions.is_empty() {
        return Err(ServiceError::InvalidInput(
            "at least one question is required".into(),
        ));
    }

    let payload = serde_json::to_string(&questions)
        .map_err(|err| ServiceError::Internal(format!("failed to encode questions: {err}")))?;
    let completion = chat
        .complete(ChatRequest {
            model: config.ai.verification_model.clone(),
            prompt: verification_prompt(&config.ai.reference_corpus, &payload),
        })
        .await?;

    let verified = parse_verified(&completion)?;
    if verified.is_empty() {
        return Err(ServiceError::VerificationError(
            "verification returned no questions".into(),
        ));
    }
    Ok(verified)
}

/// Generate then verify; every returned question carries a fresh id.
pub async fn ai_questions(
    chat: Arc<dyn ChatProvider>,
    config: Arc<AppConfig>,
    topic: String,
    count: usize,
    level: u8,
) -> Result<Vec<QuestionEntity>, ServiceError> {
    let generated = generate_questions(chat.clone(), config.clone(), topic, count, level).await?;
    let mut verified = verify_questions(chat, config, generated).await?;
    for question in &mut verified {
        question.id = Some(Uuid::new_v4().to_string());
        question.responses = None;
        if question.level == 0 {
            question.level = level;
        }
    }
    info!(count = verified.len(), level, "generated questions with the AI provider");
    Ok(verified)
}

/// Race the bank against the AI provider for a match.
///
/// The first source to succeed is appended to the match right away and `ready` fires. The
/// slower one keeps running until `residual_sourcing_deadline` and is appended when it lands.
/// If nothing succeeds within `sourcing_timeout`, both are aborted.
pub async fn source_questions(
    state: SharedState,
    request: SourcingRequest,
    ready: Option<oneshot::Sender<()>>,
) -> Result<SourcingReport, ServiceError> {
    let config = state.config();
    let store = state.require_session_store().await?;
    let bank = state.require_question_bank().await?;
    let match_id = request.match_id.clone();
    records::load_match(store.as_ref(), &match_id).await?;

    let bank_task = AbortOnDrop(tokio::spawn(bank_questions(
        bank.clone(),
        request.level,
        config.bank_batch_size,
    )));
    let ai_task = AbortOnDrop(tokio::spawn(ai_questions(
        state.chat(),
        config.clone(),
        request.topic.clone(),
        request.count,
        request.level,
    )));

    let deadline = Instant::now() + config.sourcing_timeout;
    let first = timeout_at(deadline, future::select(bank_task, ai_task))
        .await
        .map_err(|_| ServiceError::SourcingTimeout)?;

    let (first_source, first_result, slower_source, slower_task) = match first {
        Either::Left((joined, ai)) => (QuestionSource::Bank, flatten(joined), QuestionSource::Ai, ai),
        Either::Right((joined, bank)) => {
            (QuestionSource::Ai, flatten(joined), QuestionSource::Bank, bank)
        }
    };

    let (source, questions, other_source, pending) = match first_result {
        Ok(questions) => (first_source, questions, slower_source, Some(slower_task)),
        Err(first_err) => {
            warn!(
                %match_id,
                source = first_source.label(),
                error = %first_err,
                "question source failed; waiting for the other one"
            );
            let joined = timeout_at(deadline, slower_task)
                .await
                .map_err(|_| ServiceError::SourcingTimeout)?;
            match flatten(joined) {
                Ok(questions) => (slower_source, questions, first_source, None),
                Err(second_err) => {
                    let (ai_err, bank_err) = if first_source == QuestionSource::Ai {
                        (first_err, second_err)
                    } else {
                        (second_err, first_err)
                    };
                    // A slow provider is the likelier root cause; otherwise the bank is.
                    return Err(if ai_err.kind() == ErrorKind::Timeout {
                        ai_err
                    } else {
                        bank_err
                    });
                }
            }
        }
    };

    let mut total_questions = append_questions(store.as_ref(), &match_id, &questions).await?;
    notify_session(&state, &match_id);
    if let Some(ready) = ready {
        let _ = ready.send(());
    }
    info!(
        %match_id,
        source = source.label(),
        count = questions.len(),
        "first question batch stored"
    );

    let mut warnings = Vec::new();
    warnings.extend(record_provenance(bank.as_ref(), source, &questions).await?);

    let mut other_questions = Vec::new();
    if let Some(task) = pending {
        match timeout(config.residual_sourcing_deadline, task).await {
            Ok(joined) => match flatten(joined) {
                Ok(extra) => {
                    match append_questions(store.as_ref(), &match_id, &extra).await {
                        Ok(total) => {
                            total_questions = total;
                            notify_session(&state, &match_id);
                        }
                        Err(err) => warn!(
                            %match_id,
                            error = %err,
                            "failed to append the slower question batch"
                        ),
                    }
                    warnings.extend(record_provenance(bank.as_ref(), other_source, &extra).await?);
                    other_questions = extra;
                }
                Err(err) => warn!(
                    %match_id,
                    source = other_source.label(),
                    error = %err,
                    "slower question source failed"
                ),
            },
            Err(_) => warn!(
                %match_id,
                source = other_source.label(),
                "slower question source missed its deadline"
            ),
        }
    }

    Ok(SourcingReport {
        source,
        questions,
        other_source,
        other_questions,
        total_questions,
        warnings,
    })
}

/// Append questions not already on the match, returning the new total.
async fn append_questions(
    store: &dyn SessionStore,
    match_id: &str,
    questions: &[QuestionEntity],
) -> Result<usize, ServiceError> {
    let (record, ()) = records::update_match(store, match_id, |record| {
        let fresh: Vec<QuestionEntity> = questions
            .iter()
            .filter(|question| {
                question
                    .id
                    .as_deref()
                    .is_none_or(|id| record.question(id).is_none())
            })
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(Change::Keep(()));
        }
        record.questions.extend(fresh);
        Ok(Change::Write(()))
    })
    .await?;
    Ok(record.questions.len())
}

/// Bump bank use counts or save generated questions.
///
/// Storage failures only produce a log line; the questions are already on the match.
async fn record_provenance(
    bank: &dyn QuestionBank,
    source: QuestionSource,
    questions: &[QuestionEntity],
) -> Result<Option<ProvenanceWarning>, ServiceError> {
    let expected = questions.len() as u64;
    let outcome = match source {
        QuestionSource::Bank => {
            let ids = questions
                .iter()
                .filter_map(|question| question.id.clone())
                .collect();
            bank.increment_use_counts(ids).await
        }
        QuestionSource::Ai => {
            if questions.is_empty() {
                return Err(ServiceError::VerificationError(
                    "AI source produced no questions to save".into(),
                ));
            }
            bank.insert_generated(questions.to_vec()).await
        }
    };

    match outcome {
        Ok(actual) if actual == expected => Ok(None),
        Ok(actual) => {
            warn!(
                source = source.label(),
                expected, actual, "question bank bookkeeping was partial"
            );
            Ok(Some(ProvenanceWarning {
                source,
                expected,
                actual,
            }))
        }
        Err(err) => {
            warn!(source = source.label(), error = %err, "failed to update the question bank");
            Ok(None)
        }
    }
}

fn notify_session(state: &SharedState, match_id: &str) {
    if let Some(handle) = state.session(match_id) {
        handle.questions_appended();
    }
}

fn flatten(
    joined: Result<Result<Vec<QuestionEntity>, ServiceError>, JoinError>,
) -> Result<Vec<QuestionEntity>, ServiceError> {
    joined.map_err(|err| ServiceError::Internal(format!("sourcing task failed: {err}")))?
}

/// Task handle that aborts the task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

fn generation_prompt(corpus: &str, topic: &str, level: u8) -> String {
    format!(
        r#"You write questions for a two-player quiz game about {corpus}.

Write ONE accurate question that takes the whole of {corpus} into account, cross-referencing
related passages where useful.

Requirements:
- Topic: "{topic}"
- Difficulty: {level} out of 10
- Type: pick "mcq" or "true_false" at random
- Avoid repeating common questions

Answer with JSON only, shaped like this:

{{
  "question": "",
  "type": "",
  "topic": "",
  "level": {level},
  "options": ["", "", "", ""],
  "answer": 0,
  "explanation": "",
  "formatHints": {{}}
}}

Rules:
- "options" is empty for true_false questions and "answer" is then true or false.
- For mcq questions "answer" is the index of the correct option.
- For "fill_blank", blank out one key word and optionally mark its index in formatHints.
- No markdown, no comments, no text around the JSON."#
    )
}

fn verification_prompt(corpus: &str, questions: &str) -> String {
    format!(
        r#"You are an expert on {corpus}. Check and correct these generated quiz questions.

For each question make sure that:
- the question is valid and clearly phrased;
- the answer is actually correct and every other option is clearly wrong;
- the explanation is accurate and cites correct references;
- formatHints are consistent with the answer.

Fix anything inaccurate. Keep the structure: "question", "type", "topic", "level", "options",
"answer", "explanation", "formatHints".

Output a JSON array only, with no markdown and no surrounding text.

{questions}"#
    )
}

/// Parse a single generated question starting at the first `{`, ignoring trailing text.
fn parse_generated(completion: &str) -> Option<QuestionEntity> {
    let start = completion.find('{')?;
    serde_json::Deserializer::from_str(&completion[start..])
        .into_iter::<QuestionEntity>()
        .next()?
        .ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VerifiedPayload {
    Many(Vec<QuestionEntity>),
    One(Box<QuestionEntity>),
}

fn parse_verified(completion: &str) -> Result<Vec<QuestionEntity>, ServiceError> {
    let json = extract_json(completion).ok_or_else(|| {
        ServiceError::VerificationError("no JSON found in verification output".into())
    })?;

    match serde_json::from_str::<VerifiedPayload>(json) {
        Ok(VerifiedPayload::Many(questions)) => Ok(questions),
        Ok(VerifiedPayload::One(question)) => Ok(vec![*question]),
        Err(err) => Err(ServiceError::VerificationError(format!(
            "verification output is not a list of questions: {err}"
        ))),
    }
}

/// A fenced ```json block if present, otherwise the outermost array or object.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(fence) = text.find("```json") {
        let body = &text[fence + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    let start = text.find(['[', '{'])?;
    let closing = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(closing)?;
    (end > start).then(|| text[start..=end].trim())
}
