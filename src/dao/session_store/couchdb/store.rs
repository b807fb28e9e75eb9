use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{from_value, json};

use super::{
    CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        CouchMatchDocument, CouchPoolDocument, FindResponse, POOL_DOC_TYPE, POOL_INDEX_NAME,
        WriteResponse, match_doc_id, pool_doc_id,
    },
};
use crate::dao::{
    models::{MatchRecord, PairClaim, PoolEntry},
    session_store::{Revision, SessionStore, VersionedMatch, sort_pool},
    storage::{StorageResult, StoreHealth},
};

const FIND_ENDPOINT: &str = "_find";
const INDEX_ENDPOINT: &str = "_index";
/// CouchDB caps `_find` at 25 rows unless told otherwise.
const POOL_QUERY_LIMIT: u32 = 1_000;
const POOL_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    database_url: Arc<Url>,
    auth: Option<Arc<(String, String)>>,
}

impl CouchSessionStore {
    /// Connect to CouchDB, creating the database and the pool index when missing.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let invalid = || CouchDaoError::InvalidBaseUrl {
            url: config.base_url.clone(),
        };
        let mut database_url = Url::parse(&config.base_url).map_err(|_| invalid())?;
        database_url
            .path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(&config.database);

        let store = Self {
            client,
            database_url: Arc::new(database_url),
            auth: config.credentials.map(Arc::new),
        };

        store.ensure_database().await?;
        store.ensure_pool_index().await?;
        Ok(store)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = (*self.database_url).clone();
        // Checked in `connect`: the database URL can always take extra segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match self.auth.as_deref() {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> CouchResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_owned(),
                source,
            })
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let path = self.database_url.path().to_owned();
        let response = self.send(self.request(Method::GET, &[]), &path).await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self.send(self.request(Method::PUT, &[]), &path).await?;
                // 412: created concurrently by another instance.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::RequestStatus {
                        path,
                        status: create.status(),
                    })
                }
            }
            status => Err(CouchDaoError::RequestStatus { path, status }),
        }
    }

    async fn ensure_pool_index(&self) -> CouchResult<()> {
        let body = json!({
            "index": { "fields": ["doc_type", "rank"] },
            "name": POOL_INDEX_NAME,
            "type": "json",
        });
        let response = self
            .send(
                self.request(Method::POST, &[INDEX_ENDPOINT]).json(&body),
                INDEX_ENDPOINT,
            )
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: INDEX_ENDPOINT.to_owned(),
                status: response.status(),
            })
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::GET, &[doc_id]), doc_id)
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let value = response.json::<serde_json::Value>().await.map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_owned(),
                        source,
                    }
                })?;
                from_value(value)
                    .map(Some)
                    .map_err(|source| CouchDaoError::DeserializeValue {
                        path: doc_id.to_owned(),
                        source,
                    })
            }
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status,
            }),
        }
    }

    /// PUT a document and return its new revision. A stale or missing `_rev` yields a conflict.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<Revision>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .send(self.request(Method::PUT, &[doc_id]).json(document), doc_id)
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_owned(),
            }),
            status if status.is_success() => response
                .json::<WriteResponse>()
                .await
                .map(|write| write.rev)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_owned(),
                    source,
                }),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status,
            }),
        }
    }

    /// Delete a document at `rev`. Returns `false` when someone else removed or changed it first.
    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<bool> {
        let response = self
            .send(
                self.request(Method::DELETE, &[doc_id]).query(&[("rev", rev)]),
                doc_id,
            )
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status,
            }),
        }
    }

    async fn find_pool(&self, min_rank: u8, max_rank: u8) -> CouchResult<Vec<PoolEntry>> {
        let query = json!({
            "selector": {
                "doc_type": POOL_DOC_TYPE,
                "rank": { "$gte": min_rank, "$lte": max_rank },
            },
            "use_index": POOL_INDEX_NAME,
            "limit": POOL_QUERY_LIMIT,
        });
        let response = self
            .send(
                self.request(Method::POST, &[FIND_ENDPOINT]).json(&query),
                FIND_ENDPOINT,
            )
            .await?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: FIND_ENDPOINT.to_owned(),
                status: response.status(),
            });
        }

        let payload = response.json::<FindResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: FIND_ENDPOINT.to_owned(),
                source,
            }
        })?;

        let mut entries = payload
            .docs
            .into_iter()
            .map(|doc| {
                from_value::<CouchPoolDocument>(doc)
                    .map(PoolEntry::from)
                    .map_err(|source| CouchDaoError::DeserializeValue {
                        path: FIND_ENDPOINT.to_owned(),
                        source,
                    })
            })
            .collect::<CouchResult<Vec<_>>>()?;
        sort_pool(&mut entries);
        Ok(entries)
    }

    async fn upsert_pool_entry(&self, entry: PoolEntry) -> CouchResult<()> {
        let doc_id = pool_doc_id(&entry.player_id);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let rev = self
                .get_document::<CouchPoolDocument>(&doc_id)
                .await?
                .and_then(|existing| existing.rev);
            let doc = CouchPoolDocument::new(entry.clone(), rev);
            match self.put_document(&doc_id, &doc).await {
                Ok(_) => return Ok(()),
                Err(CouchDaoError::Conflict { .. }) if attempt < POOL_INSERT_ATTEMPTS => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Delete the candidate first, then the caller; put the candidate back if the caller vanished.
    async fn claim_pair(&self, player_id: &str, candidate_id: &str) -> CouchResult<PairClaim> {
        let candidate_doc_id = pool_doc_id(candidate_id);
        let Some(candidate) = self
            .get_document::<CouchPoolDocument>(&candidate_doc_id)
            .await?
        else {
            return Ok(PairClaim::CandidateTaken);
        };
        let Some(candidate_rev) = candidate.rev.as_deref() else {
            return Ok(PairClaim::CandidateTaken);
        };
        if !self
            .delete_document(&candidate_doc_id, candidate_rev)
            .await?
        {
            return Ok(PairClaim::CandidateTaken);
        }

        let player_doc_id = pool_doc_id(player_id);
        let claimed_self = match self
            .get_document::<CouchPoolDocument>(&player_doc_id)
            .await?
        {
            Some(CouchPoolDocument { rev: Some(rev), .. }) => {
                self.delete_document(&player_doc_id, &rev).await?
            }
            _ => false,
        };

        if claimed_self {
            Ok(PairClaim::Claimed)
        } else {
            self.put_document(&candidate_doc_id, &candidate.without_rev())
                .await?;
            Ok(PairClaim::SelfTaken)
        }
    }
}

impl SessionStore for CouchSessionStore {
    fn load_match(&self, match_id: &str) -> BoxFuture<'static, StorageResult<Option<VersionedMatch>>> {
        let store = self.clone();
        let doc_id = match_doc_id(match_id);
        Box::pin(async move {
            let maybe_doc = store.get_document::<CouchMatchDocument>(&doc_id).await?;
            Ok(maybe_doc.and_then(|doc| {
                doc.rev.map(|revision| VersionedMatch {
                    record: doc.record,
                    revision,
                })
            }))
        })
    }

    fn create_match(
        &self,
        match_id: &str,
        record: MatchRecord,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        let doc_id = match_doc_id(match_id);
        Box::pin(async move {
            let doc = CouchMatchDocument {
                id: doc_id.clone(),
                rev: None,
                record,
            };
            store.put_document(&doc_id, &doc).await.map_err(Into::into)
        })
    }

    fn replace_match(
        &self,
        match_id: &str,
        record: MatchRecord,
        expected_revision: Revision,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        let doc_id = match_doc_id(match_id);
        Box::pin(async move {
            let doc = CouchMatchDocument {
                id: doc_id.clone(),
                rev: Some(expected_revision),
                record,
            };
            store.put_document(&doc_id, &doc).await.map_err(Into::into)
        })
    }

    fn pool_insert(&self, entry: PoolEntry) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_pool_entry(entry).await.map_err(Into::into) })
    }

    fn pool_range(
        &self,
        min_rank: u8,
        max_rank: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<PoolEntry>>> {
        let store = self.clone();
        Box::pin(async move { store.find_pool(min_rank, max_rank).await.map_err(Into::into) })
    }

    fn pool_claim_pair(
        &self,
        player_id: &str,
        candidate_id: &str,
    ) -> BoxFuture<'static, StorageResult<PairClaim>> {
        let store = self.clone();
        let player_id = player_id.to_owned();
        let candidate_id = candidate_id.to_owned();
        Box::pin(async move {
            store
                .claim_pair(&player_id, &candidate_id)
                .await
                .map_err(Into::into)
        })
    }

    fn pool_remove(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let doc_id = pool_doc_id(player_id);
        Box::pin(async move {
            match store.get_document::<CouchPoolDocument>(&doc_id).await? {
                Some(CouchPoolDocument { rev: Some(rev), .. }) => store
                    .delete_document(&doc_id, &rev)
                    .await
                    .map_err(Into::into),
                _ => Ok(false),
            }
        })
    }
}

impl StoreHealth for CouchSessionStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = store.database_url.path().to_owned();
            let response = store.send(store.request(Method::GET, &[]), &path).await?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
