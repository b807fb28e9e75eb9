pub mod match_session;
pub mod state_machine;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, DashSet};
use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{question_bank::QuestionBank, session_store::SessionStore},
    error::ServiceError,
    services::ai_provider::ChatProvider,
};

pub use self::match_session::MatchHandle;

pub type SharedState = Arc<AppState>;

/// A hot-swappable storage backend plus its last known health.
pub struct StoreSlot<T: ?Sized> {
    store: RwLock<Option<Arc<T>>>,
    healthy: AtomicBool,
}

impl<T: ?Sized> StoreSlot<T> {
    fn empty() -> Self {
        Self {
            store: RwLock::new(None),
            healthy: AtomicBool::new(false),
        }
    }

    /// Current backend, if one is installed.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.store.read().await.clone()
    }

    async fn install(&self, store: Arc<T>) {
        *self.store.write().await = Some(store);
        self.healthy.store(true, Ordering::SeqCst);
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Central application state: storage backends, the AI provider and live match sessions.
pub struct AppState {
    config: Arc<AppConfig>,
    session_store: StoreSlot<dyn SessionStore>,
    question_bank: StoreSlot<dyn QuestionBank>,
    chat: Arc<dyn ChatProvider>,
    sessions: DashMap<String, MatchHandle>,
    completed: DashSet<String>,
    degraded: watch::Sender<bool>,
}

/// Selects one of the two storage slots, so supervisors can be written once.
pub type SlotAccessor<T> = fn(&AppState) -> &StoreSlot<T>;

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`].
    ///
    /// The application starts in degraded mode until both storage backends are installed.
    pub fn new(config: AppConfig, chat: Arc<dyn ChatProvider>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config: Arc::new(config),
            session_store: StoreSlot::empty(),
            question_bank: StoreSlot::empty(),
            chat,
            sessions: DashMap::new(),
            completed: DashSet::new(),
            degraded: degraded_tx,
        })
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    pub fn chat(&self) -> Arc<dyn ChatProvider> {
        self.chat.clone()
    }

    /// Slot holding the match/pool store.
    pub fn session_store_slot(&self) -> &StoreSlot<dyn SessionStore> {
        &self.session_store
    }

    /// Slot holding the question bank.
    pub fn question_bank_slot(&self) -> &StoreSlot<dyn QuestionBank> {
        &self.question_bank
    }

    /// Session store, or [`ServiceError::Degraded`] while none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store.get().await.ok_or(ServiceError::Degraded)
    }

    /// Question bank, or [`ServiceError::Degraded`] while none is installed.
    pub async fn require_question_bank(&self) -> Result<Arc<dyn QuestionBank>, ServiceError> {
        self.question_bank.get().await.ok_or(ServiceError::Degraded)
    }

    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        self.install_store(Self::session_store_slot, store).await;
    }

    pub async fn install_question_bank(&self, bank: Arc<dyn QuestionBank>) {
        self.install_store(Self::question_bank_slot, bank).await;
    }

    /// Install a backend into the selected slot and re-evaluate degraded mode.
    pub async fn install_store<T: ?Sized>(&self, slot: SlotAccessor<T>, store: Arc<T>) {
        slot(self).install(store).await;
        self.refresh_degraded();
    }

    /// Record the health of the selected slot and re-evaluate degraded mode.
    pub fn set_store_health<T: ?Sized>(&self, slot: SlotAccessor<T>, healthy: bool) {
        slot(self).set_healthy(healthy);
        self.refresh_degraded();
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    fn refresh_degraded(&self) {
        let degraded = !(self.session_store.is_healthy() && self.question_bank.is_healthy());
        self.degraded.send_if_modified(|current| {
            if *current == degraded {
                false
            } else {
                *current = degraded;
                true
            }
        });
    }

    /// Registry of live match sessions keyed by match id.
    pub fn sessions(&self) -> &DashMap<String, MatchHandle> {
        &self.sessions
    }

    /// Handle of a live session, if one is running.
    pub fn session(&self, match_id: &str) -> Option<MatchHandle> {
        self.sessions.get(match_id).map(|entry| entry.value().clone())
    }

    /// Remember that a match played its last question in this process.
    pub fn mark_completed(&self, match_id: &str) {
        self.completed.insert(match_id.to_owned());
    }

    pub fn is_completed(&self, match_id: &str) -> bool {
        self.completed.contains(match_id)
    }
}
