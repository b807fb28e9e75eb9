use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use axum_valid::Valid;

use crate::{
    dto::questions::{
        BankQuestionsRequest, GenerateQuestionsRequest, QuestionDto, QuestionsResponse,
        SourceQuestionsRequest, SourceQuestionsResponse, VerifiedQuestionsResponse,
        VerifyQuestionsRequest,
    },
    error::AppError,
    services::sourcing_service::{self, SourcingRequest},
    state::SharedState,
};

/// Routes exposing question sourcing on its own.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/questions/source", post(source_questions))
        .route("/questions/bank", post(bank_questions))
        .route("/questions/generate", post(generate_questions))
        .route("/questions/verify", post(verify_questions))
}

/// Race the bank against the AI provider and store both batches on the match.
#[utoipa::path(
    post,
    path = "/questions/source",
    tag = "questions",
    request_body = SourceQuestionsRequest,
    responses(
        (status = 200, description = "Questions stored on the match", body = SourceQuestionsResponse),
        (status = 207, description = "Questions stored but bank bookkeeping was partial", body = SourceQuestionsResponse),
        (status = 404, description = "Unknown match"),
        (status = 504, description = "No source delivered in time")
    )
)]
pub async fn source_questions(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SourceQuestionsRequest>>,
) -> Result<Response, AppError> {
    let topic = payload
        .topic
        .filter(|topic| !topic.trim().is_empty())
        .unwrap_or_else(|| state.config().default_topic.clone());
    let request = SourcingRequest {
        match_id: payload.game_id,
        topic,
        count: payload.count,
        level: payload.level,
    };

    let report = sourcing_service::source_questions(state.clone(), request, None).await?;
    let status = if report.warnings.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(SourceQuestionsResponse::from(report))).into_response())
}

/// Least used bank questions of a difficulty.
#[utoipa::path(
    post,
    path = "/questions/bank",
    tag = "questions",
    request_body = BankQuestionsRequest,
    responses(
        (status = 200, description = "Bank questions", body = QuestionsResponse),
        (status = 404, description = "No question for this level")
    )
)]
pub async fn bank_questions(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<BankQuestionsRequest>>,
) -> Result<Json<QuestionsResponse>, AppError> {
    let bank = state.require_question_bank().await?;
    let questions =
        sourcing_service::bank_questions(bank, payload.level, state.config().bank_batch_size)
            .await?;
    Ok(Json(questions.into()))
}

/// Generate fresh questions and run them through verification.
#[utoipa::path(
    post,
    path = "/questions/generate",
    tag = "questions",
    request_body = GenerateQuestionsRequest,
    responses(
        (status = 200, description = "Verified questions", body = QuestionsResponse),
        (status = 502, description = "Generation or verification failed"),
        (status = 504, description = "AI provider timed out")
    )
)]
pub async fn generate_questions(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<GenerateQuestionsRequest>>,
) -> Result<Json<QuestionsResponse>, AppError> {
    let questions = sourcing_service::ai_questions(
        state.chat(),
        state.config(),
        payload.topic,
        payload.count,
        payload.level,
    )
    .await?;
    Ok(Json(questions.into()))
}

/// Check and correct questions with the verification model.
#[utoipa::path(
    post,
    path = "/questions/verify",
    tag = "questions",
    request_body = VerifyQuestionsRequest,
    responses(
        (status = 200, description = "Corrected questions", body = VerifiedQuestionsResponse),
        (status = 502, description = "Verification output was not a list of questions")
    )
)]
pub async fn verify_questions(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<VerifyQuestionsRequest>>,
) -> Result<Json<VerifiedQuestionsResponse>, AppError> {
    let questions = payload.questions.into_iter().map(Into::into).collect();
    let verified =
        sourcing_service::verify_questions(state.chat(), state.config(), questions).await?;
    Ok(Json(VerifiedQuestionsResponse {
        verified_questions: verified.into_iter().map(QuestionDto::from).collect(),
    }))
}
