use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::storage::{StorageError, StoreHealth},
    state::{SharedState, SlotAccessor},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep one storage backend connected, flagging its slot unhealthy while it is unreachable.
///
/// `backend` only labels log lines. The slot selected by `slot` receives the store once
/// `connect` succeeds and is marked healthy or not after every health poll.
pub async fn run<S, F, Fut>(
    state: SharedState,
    backend: &'static str,
    slot: SlotAccessor<S>,
    mut connect: F,
) where
    S: ?Sized + StoreHealth + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<S>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(slot, store.clone()).await;
                info!(backend, "storage connection established");
                delay = INITIAL_DELAY;

                if !supervise(&state, backend, slot, store.as_ref()).await {
                    warn!(backend, "exhausted storage reconnect attempts; staying degraded");
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(backend, error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll the store until a failed health check cannot be repaired by reconnecting.
async fn supervise<S>(
    state: &SharedState,
    backend: &'static str,
    slot: SlotAccessor<S>,
    store: &S,
) -> bool
where
    S: ?Sized + StoreHealth,
{
    loop {
        match store.health_check().await {
            Ok(()) => {
                state.set_store_health(slot, true);
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(backend, error = %err, "storage health check failed");
                if !reconnect(state, backend, slot, store).await {
                    return false;
                }
                state.set_store_health(slot, true);
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

async fn reconnect<S>(
    state: &SharedState,
    backend: &'static str,
    slot: SlotAccessor<S>,
    store: &S,
) -> bool
where
    S: ?Sized + StoreHealth,
{
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(backend, attempt, "storage reconnection succeeded");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        backend, attempt, error = %err,
                        "storage reconnect first attempt failed; entering degraded mode"
                    );
                    state.set_store_health(slot, false);
                } else {
                    warn!(backend, attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            question_bank::MemoryQuestionBank,
            session_store::{MemorySessionStore, SessionStore},
        },
        services::ai_provider::{ChatProvider, ChatRequest, ProviderError},
        state::AppState,
    };

    struct Silent;

    impl ChatProvider for Silent {
        fn complete(&self, _: ChatRequest) -> BoxFuture<'static, Result<String, ProviderError>> {
            Box::pin(async { Err(ProviderError::EmptyCompletion) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_until_both_backends_connect() {
        let state = AppState::new(AppConfig::default(), Arc::new(Silent));
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(state.is_degraded());

        let counter = calls.clone();
        let supervisor = tokio::spawn(run(
            state.clone(),
            "session",
            AppState::session_store_slot,
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(StorageError::conflict("first attempt"))
                    } else {
                        Ok(Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>)
                    }
                }
            },
        ));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(state.is_degraded());

        state
            .install_question_bank(Arc::new(MemoryQuestionBank::new()))
            .await;
        assert!(!state.is_degraded());
        supervisor.abort();
    }
}
