pub(crate) mod memory;

pub use memory::{MemoryStore, WriteOp};

use crate::models::ServerTimestamp;
use crate::platform::{sleep, BrowserRuntime, Runtime};
use async_trait::async_trait;
use futures::stream::{self, LocalBoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::rc::Rc;
use thiserror::Error;

/// Consecutive watch failures after which the change stream ends.
const MAX_WATCH_FAILURES: u32 = 3;

/// Pause before re-polling after a failed watch, scaled by the failure count.
const WATCH_RETRY_MS: u32 = 1000;

fn watch_retry_delay_ms(failures: u32) -> u32 {
    WATCH_RETRY_MS.saturating_mul(failures)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("malformed document: {0}")]
    Decode(String),
}

impl StoreError {
    pub(crate) fn unavailable(e: impl std::fmt::Display) -> Self {
        Self::Unavailable(e.to_string())
    }

    pub(crate) fn decode(e: impl std::fmt::Display) -> Self {
        Self::Decode(e.to_string())
    }

    /// Maps a non-success HTTP status to the store taxonomy.
    pub(crate) fn from_status(status: u16, body: &str, ctx: &str) -> Self {
        let msg = format!("{ctx} ({status}): {body}");
        match status {
            404 => Self::NotFound(msg),
            401 | 403 => Self::PermissionDenied(msg),
            _ => Self::Unavailable(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Collection {
    Notes,
    Folders,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CreatedDesc,
    CreatedAsc,
}

/// A stored document as returned by the store: metadata plus a free-form body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub create_time: ServerTimestamp,
    pub update_time: ServerTimestamp,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// What `add_document` hands back: the assigned id and server timestamps.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DocumentMeta {
    pub id: String,
    pub create_time: ServerTimestamp,
    pub update_time: ServerTimestamp,
}

/// The authoritative document store.
///
/// Everything here can fail; callers decide what a failure means for local state.
#[async_trait(?Send)]
pub trait RemoteStore {
    async fn add_document(
        &self,
        collection: Collection,
        owner_id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<DocumentMeta>;

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<()>;

    async fn delete_document(&self, collection: Collection, id: &str) -> StoreResult<()>;

    async fn query_by_owner(&self, collection: Collection, owner_id: &str)
        -> StoreResult<Vec<Document>>;

    /// Live query: yields the full result set on subscribe and after every change.
    ///
    /// The stream ends when the store gives up; dropping it unsubscribes.
    fn subscribe(
        &self,
        collection: Collection,
        owner_id: &str,
        order: OrderBy,
    ) -> LocalBoxStream<'static, StoreResult<Vec<Document>>>;
}

#[derive(Serialize, Clone, Debug)]
struct AddDocumentRequest<'a> {
    owner_id: &'a str,
    fields: &'a Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct DocumentListResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct WatchResponse {
    version: u64,
    #[serde(default)]
    documents: Vec<Document>,
}

/// JSON-over-HTTP document store client.
#[derive(Clone)]
pub struct HttpStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    runtime: Rc<dyn Runtime>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
            runtime: Rc::new(BrowserRuntime),
        }
    }

    /// Clock used to space out watch retries.
    pub fn with_runtime(mut self, runtime: Rc<dyn Runtime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/v1/{}", self.base_url, collection)
    }

    fn document_url(&self, collection: Collection, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(collection),
            urlencoding::encode(id)
        )
    }

    fn watch_url(&self, collection: Collection, owner_id: &str, order: OrderBy) -> String {
        format!(
            "{}/watch?owner={}&order={}",
            self.collection_url(collection),
            urlencoding::encode(owner_id),
            order
        )
    }

    fn with_auth_headers(
        mut req: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn send(
        req: reqwest::RequestBuilder,
        token: Option<&str>,
        ctx: &str,
    ) -> StoreResult<reqwest::Response> {
        let res = Self::with_auth_headers(req, token)
            .send()
            .await
            .map_err(StoreError::unavailable)?;

        if res.status().is_success() {
            Ok(res)
        } else {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(StoreError::from_status(status, &body, ctx))
        }
    }

    async fn fetch_watch(
        client: &reqwest::Client,
        url: &str,
        token: Option<&str>,
        after: Option<u64>,
    ) -> StoreResult<WatchResponse> {
        let url = match after {
            Some(v) => format!("{url}&after={v}"),
            None => url.to_string(),
        };
        let res = Self::send(client.get(url), token, "Watch failed").await?;
        res.json().await.map_err(StoreError::decode)
    }
}

#[async_trait(?Send)]
impl RemoteStore for HttpStore {
    async fn add_document(
        &self,
        collection: Collection,
        owner_id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<DocumentMeta> {
        let req = self
            .client
            .post(self.collection_url(collection))
            .json(&AddDocumentRequest {
                owner_id,
                fields: &fields,
            });
        let res = Self::send(req, self.token.as_deref(), "Add failed").await?;
        res.json().await.map_err(StoreError::decode)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<()> {
        let req = self
            .client
            .patch(self.document_url(collection, id))
            .json(&patch);
        Self::send(req, self.token.as_deref(), "Update failed").await?;
        Ok(())
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> StoreResult<()> {
        let req = self.client.delete(self.document_url(collection, id));
        Self::send(req, self.token.as_deref(), "Delete failed").await?;
        Ok(())
    }

    async fn query_by_owner(
        &self,
        collection: Collection,
        owner_id: &str,
    ) -> StoreResult<Vec<Document>> {
        let url = format!(
            "{}?owner={}",
            self.collection_url(collection),
            urlencoding::encode(owner_id)
        );
        let res = Self::send(self.client.get(url), self.token.as_deref(), "Query failed").await?;
        let data: DocumentListResponse = res.json().await.map_err(StoreError::decode)?;
        Ok(data.documents)
    }

    fn subscribe(
        &self,
        collection: Collection,
        owner_id: &str,
        order: OrderBy,
    ) -> LocalBoxStream<'static, StoreResult<Vec<Document>>> {
        struct Watch {
            client: reqwest::Client,
            url: String,
            token: Option<String>,
            runtime: Rc<dyn Runtime>,
            after: Option<u64>,
            failures: u32,
        }

        let init = Watch {
            client: self.client.clone(),
            url: self.watch_url(collection, owner_id, order),
            token: self.token.clone(),
            runtime: self.runtime.clone(),
            after: None,
            failures: 0,
        };

        stream::unfold(init, |mut w| async move {
            if w.failures >= MAX_WATCH_FAILURES {
                return None;
            }
            if w.failures > 0 {
                sleep(&*w.runtime, watch_retry_delay_ms(w.failures)).await;
            }
            loop {
                match Self::fetch_watch(&w.client, &w.url, w.token.as_deref(), w.after).await {
                    // Long-poll timed out without a change.
                    Ok(resp) if Some(resp.version) == w.after => continue,
                    Ok(resp) => {
                        w.failures = 0;
                        w.after = Some(resp.version);
                        return Some((Ok(resp.documents), w));
                    }
                    Err(e) => {
                        w.failures += 1;
                        return Some((Err(e), w));
                    }
                }
            }
        })
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            StoreError::from_status(404, "", "Update failed"),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from_status(403, "", "Update failed"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            StoreError::from_status(401, "", "Update failed"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            StoreError::from_status(503, "busy", "Update failed"),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_status_error_message_keeps_context() {
        let e = StoreError::from_status(500, "boom", "Add failed");
        assert_eq!(e.to_string(), "remote store unavailable: Add failed (500): boom");
    }

    #[test]
    fn test_watch_retry_delay_grows_with_failures() {
        assert_eq!(watch_retry_delay_ms(1), 1000);
        assert_eq!(watch_retry_delay_ms(2), 2000);
        assert!(watch_retry_delay_ms(MAX_WATCH_FAILURES) < 10_000);
        assert_eq!(watch_retry_delay_ms(u32::MAX), u32::MAX);
    }

    #[test]
    fn test_collection_and_order_path_segments() {
        assert_eq!(Collection::Notes.as_ref(), "notes");
        assert_eq!(Collection::Folders.to_string(), "folders");
        assert_eq!(OrderBy::CreatedDesc.to_string(), "created_desc");
    }

    #[test]
    fn test_http_store_urls() {
        let store = HttpStore::new("http://localhost:6689/");
        assert_eq!(
            store.collection_url(Collection::Notes),
            "http://localhost:6689/v1/notes"
        );
        assert_eq!(
            store.document_url(Collection::Folders, "a/b"),
            "http://localhost:6689/v1/folders/a%2Fb"
        );
        assert_eq!(
            store.watch_url(Collection::Notes, "u 1", OrderBy::CreatedDesc),
            "http://localhost:6689/v1/notes/watch?owner=u%201&order=created_desc"
        );
    }

    #[test]
    fn test_watch_response_contract_deserialize() {
        let json = r#"{
            "version": 12,
            "documents": [{
                "id": "n1",
                "owner_id": "u1",
                "create_time": 4,
                "update_time": 9,
                "fields": {"title": "hello", "content": "", "folder_id": null}
            }]
        }"#;
        let parsed: WatchResponse = serde_json::from_str(json).expect("watch response should parse");
        assert_eq!(parsed.version, 12);
        assert_eq!(parsed.documents.len(), 1);
        assert_eq!(parsed.documents[0].update_time, ServerTimestamp(9));
    }

    #[test]
    fn test_document_meta_contract_deserialize() {
        let json = r#"{"id": "f9", "create_time": 1, "update_time": 1}"#;
        let meta: DocumentMeta = serde_json::from_str(json).expect("meta should parse");
        assert_eq!(meta.id, "f9");
    }

    #[test]
    fn test_add_request_serialization() {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String("Inbox".to_string()));
        let v = serde_json::to_value(AddDocumentRequest {
            owner_id: "u1",
            fields: &fields,
        })
        .expect("should serialize");
        assert_eq!(v["owner_id"], "u1");
        assert_eq!(v["fields"]["name"], "Inbox");
    }
}
