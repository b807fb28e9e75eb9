//! CouchDB-backed session store. Match records and pool entries are plain documents; the CouchDB
//! `_rev` doubles as the optimistic-concurrency revision.

mod error;
mod models;
mod store;

pub use error::CouchDaoError;
pub use store::CouchSessionStore;

/// Connection settings for the CouchDB session store.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<(String, String)>,
}

impl CouchConfig {
    /// Read `COUCH_BASE_URL`/`COUCH_DB` and the optional basic-auth pair.
    ///
    /// Returns `None` when the store is not configured at all.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("COUCH_BASE_URL").ok()?;
        let database = std::env::var("COUCH_DB").unwrap_or_else(|_| "quiz_duel".to_owned());
        let credentials = std::env::var("COUCH_USERNAME")
            .ok()
            .zip(std::env::var("COUCH_PASSWORD").ok());

        Some(Self {
            base_url,
            database,
            credentials,
        })
    }
}
