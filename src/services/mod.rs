/// OpenAI-compatible chat client used to write and check questions.
pub mod ai_provider;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Winner, loser or draw of a finished match, and contest persistence.
pub mod leaderboard_service;
/// Ranked pairing of waiting players.
pub mod matchmaking_service;
/// Optimistic read-modify-write helpers over stored match records.
pub mod records;
/// Answer scoring for a single round.
pub mod round_service;
/// Question sourcing race between the bank and the AI provider.
pub mod sourcing_service;
/// Storage connection supervisor with reconnect backoff.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
