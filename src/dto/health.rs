use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the match/pool store answered its last ping.
    pub session_store: bool,
    /// Whether the question bank answered its last ping.
    pub question_bank: bool,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(session_store: bool, question_bank: bool) -> Self {
        Self {
            status: "ok".to_string(),
            session_store,
            question_bank,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(session_store: bool, question_bank: bool) -> Self {
        Self {
            status: "degraded".to_string(),
            session_store,
            question_bank,
        }
    }
}
