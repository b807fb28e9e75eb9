/// Persisted model definitions shared by every backend.
pub mod models;
/// Question bank and contest storage.
pub mod question_bank;
/// Match records and the ranked waiting pool.
pub mod session_store;
/// Storage error type and backend health hooks.
pub mod storage;
