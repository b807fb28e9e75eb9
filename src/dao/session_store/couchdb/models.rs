use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::{MatchRecord, PoolEntry};

pub const MATCH_PREFIX: &str = "match::";
pub const POOL_PREFIX: &str = "pool::";
pub const POOL_DOC_TYPE: &str = "pool";
pub const POOL_INDEX_NAME: &str = "pool-rank-idx";

pub fn match_doc_id(match_id: &str) -> String {
    format!("{MATCH_PREFIX}{match_id}")
}

pub fn pool_doc_id(player_id: &str) -> String {
    format!("{POOL_PREFIX}{player_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchMatchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub record: MatchRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchPoolDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub doc_type: String,
    pub player_id: String,
    pub rank: u8,
    pub joined_at: SystemTime,
}

impl CouchPoolDocument {
    pub fn new(entry: PoolEntry, rev: Option<String>) -> Self {
        Self {
            id: pool_doc_id(&entry.player_id),
            rev,
            doc_type: POOL_DOC_TYPE.to_owned(),
            player_id: entry.player_id,
            rank: entry.rank,
            joined_at: entry.joined_at,
        }
    }

    /// Same entry without the revision, for re-inserting a deleted document.
    pub fn without_rev(&self) -> Self {
        Self {
            rev: None,
            ..self.clone()
        }
    }
}

impl From<CouchPoolDocument> for PoolEntry {
    fn from(doc: CouchPoolDocument) -> Self {
        Self {
            player_id: doc.player_id,
            rank: doc.rank,
            joined_at: doc.joined_at,
        }
    }
}

/// Body returned by CouchDB for successful writes.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<Value>,
}
