use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping both storage backends and report whether the service runs degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let session_store = match state.require_session_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "session store health check failed");
                false
            }
        },
        Err(_) => {
            warn!("session store unavailable (degraded mode)");
            false
        }
    };

    let question_bank = match state.require_question_bank().await {
        Ok(bank) => match bank.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "question bank health check failed");
                false
            }
        },
        Err(_) => {
            warn!("question bank unavailable (degraded mode)");
            false
        }
    };

    if state.is_degraded() {
        HealthResponse::degraded(session_store, question_bank)
    } else {
        HealthResponse::ok(session_store, question_bank)
    }
}
