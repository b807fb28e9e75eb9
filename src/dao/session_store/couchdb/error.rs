use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures talking to CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("invalid CouchDB base URL `{url}`")]
    InvalidBaseUrl { url: String },
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// 409 from CouchDB: the `_rev` we sent is no longer current.
    #[error("CouchDB revision conflict on `{path}`")]
    Conflict { path: String },
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to deserialize CouchDB document `{path}`")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::Conflict { path } => StorageError::conflict(path),
            CouchDaoError::DeserializeValue { path, source } => {
                StorageError::corrupted(path, source)
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
