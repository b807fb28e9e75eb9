use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Quiz Duel Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::matches::start_match,
        crate::routes::matches::get_match,
        crate::routes::matches::leave_queue,
        crate::routes::questions::source_questions,
        crate::routes::questions::bank_questions,
        crate::routes::questions::generate_questions,
        crate::routes::questions::verify_questions,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::matchmaking::StartMatchRequest,
            crate::dto::matchmaking::RankInput,
            crate::dto::matchmaking::StartMatchResponse,
            crate::dto::matchmaking::LeaveQueueResponse,
            crate::dto::matchmaking::PlayerScoreView,
            crate::dto::matchmaking::MatchView,
            crate::dto::questions::QuestionDto,
            crate::dto::questions::SourceQuestionsRequest,
            crate::dto::questions::SourceQuestionsResponse,
            crate::dto::questions::BankQuestionsRequest,
            crate::dto::questions::GenerateQuestionsRequest,
            crate::dto::questions::QuestionsResponse,
            crate::dto::questions::VerifyQuestionsRequest,
            crate::dto::questions::VerifiedQuestionsResponse,
            crate::services::sourcing_service::QuestionSource,
            crate::services::sourcing_service::ProvenanceWarning,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::JoinRoomPayload,
            crate::dto::ws::GameRef,
            crate::dto::ws::AnswerPayload,
            crate::dto::ws::JoinedPayload,
            crate::dto::ws::PublicQuestion,
            crate::dto::ws::AnswerBroadcast,
            crate::dto::ws::RoomMessagePayload,
            crate::dto::ws::ErrorPayload,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "matches", description = "Ranked matchmaking and match inspection"),
        (name = "questions", description = "Question bank, generation and verification"),
        (name = "rooms", description = "WebSocket rooms where matches are played"),
    )
)]
pub struct ApiDoc;
