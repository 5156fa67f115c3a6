use super::{Collection, Document, DocumentMeta, OrderBy, RemoteStore, StoreError, StoreResult};
use crate::models::ServerTimestamp;
use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::stream::{LocalBoxStream, StreamExt};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

/// One mutating call observed by the store, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Add {
        collection: Collection,
        id: String,
    },
    Update {
        collection: Collection,
        id: String,
        patch: Map<String, Value>,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

struct Subscriber {
    collection: Collection,
    owner_id: String,
    order: OrderBy,
    tx: mpsc::UnboundedSender<StoreResult<Vec<Document>>>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<Collection, Vec<Document>>,
    clock: u64,
    next_id: u64,
    subscribers: Vec<Subscriber>,
    writes: Vec<WriteOp>,

    /// Injected failures, consumed one per remote call.
    failures: VecDeque<StoreError>,

    paused: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Inner {
    fn tick(&mut self) -> ServerTimestamp {
        self.clock += 1;
        ServerTimestamp(self.clock)
    }

    fn snapshot(&self, collection: Collection, owner_id: &str, order: OrderBy) -> Vec<Document> {
        let mut out: Vec<Document> = self
            .docs
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| d.owner_id == owner_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        match order {
            OrderBy::CreatedDesc => out.sort_by(|a, b| b.create_time.cmp(&a.create_time)),
            OrderBy::CreatedAsc => out.sort_by(|a, b| a.create_time.cmp(&b.create_time)),
        }
        out
    }

    fn insert(&mut self, collection: Collection, owner_id: &str, fields: Map<String, Value>) -> DocumentMeta {
        self.next_id += 1;
        let id = format!("{}-{}", collection, self.next_id);
        let now = self.tick();
        self.docs.entry(collection).or_default().push(Document {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            create_time: now,
            update_time: now,
            fields,
        });
        DocumentMeta {
            id,
            create_time: now,
            update_time: now,
        }
    }
}

/// In-process document store.
///
/// Assigns ids and monotonic timestamps like a real backend, keeps live queries
/// up to date, and can be told to fail or to hold requests until resumed.
#[derive(Default)]
pub struct MemoryStore {
    inner: RefCell<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document directly, as another session would.
    pub fn insert_document(
        &self,
        collection: Collection,
        owner_id: &str,
        fields: Map<String, Value>,
    ) -> DocumentMeta {
        let meta = self.inner.borrow_mut().insert(collection, owner_id, fields);
        self.publish(collection);
        meta
    }

    pub fn get(&self, collection: Collection, id: &str) -> Option<Document> {
        self.inner
            .borrow()
            .docs
            .get(&collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }

    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        self.inner
            .borrow()
            .docs
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.inner.borrow().writes.clone()
    }

    /// The next remote call fails with `err` instead of running.
    pub fn fail_next(&self, err: StoreError) {
        self.inner.borrow_mut().failures.push_back(err);
    }

    /// Holds every following remote call until `resume`.
    pub fn pause(&self) {
        self.inner.borrow_mut().paused = true;
    }

    pub fn resume(&self) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            inner.paused = false;
            std::mem::take(&mut inner.waiters)
        };
        for w in waiters {
            let _ = w.send(());
        }
    }

    /// Ends every live query on `collection` with `err`.
    pub fn break_subscriptions(&self, collection: Collection, err: StoreError) {
        let mut inner = self.inner.borrow_mut();
        let (broken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.subscribers)
            .into_iter()
            .partition(|s| s.collection == collection);
        inner.subscribers = kept;
        for sub in broken {
            let _ = sub.tx.unbounded_send(Err(err.clone()));
        }
    }

    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|s| s.collection == collection && !s.tx.is_closed())
            .count()
    }

    async fn enter(&self) -> StoreResult<()> {
        let rx = {
            let mut inner = self.inner.borrow_mut();
            if inner.paused {
                let (tx, rx) = oneshot::channel();
                inner.waiters.push(tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }

        match self.inner.borrow_mut().failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn publish(&self, collection: Collection) {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        let inner = &*inner;
        for sub in inner.subscribers.iter().filter(|s| s.collection == collection) {
            let snapshot = inner.snapshot(collection, &sub.owner_id, sub.order);
            let _ = sub.tx.unbounded_send(Ok(snapshot));
        }
    }
}

#[async_trait(?Send)]
impl RemoteStore for MemoryStore {
    async fn add_document(
        &self,
        collection: Collection,
        owner_id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<DocumentMeta> {
        self.enter().await?;
        let meta = {
            let mut inner = self.inner.borrow_mut();
            let meta = inner.insert(collection, owner_id, fields);
            inner.writes.push(WriteOp::Add {
                collection,
                id: meta.id.clone(),
            });
            meta
        };
        self.publish(collection);
        Ok(meta)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> StoreResult<()> {
        self.enter().await?;
        {
            let mut inner = self.inner.borrow_mut();
            let now = inner.tick();
            let doc = inner
                .docs
                .get_mut(&collection)
                .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
                .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;
            for (k, v) in patch.iter() {
                doc.fields.insert(k.clone(), v.clone());
            }
            doc.update_time = now;
            inner.writes.push(WriteOp::Update {
                collection,
                id: id.to_string(),
                patch,
            });
        }
        self.publish(collection);
        Ok(())
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> StoreResult<()> {
        self.enter().await?;
        {
            let mut inner = self.inner.borrow_mut();
            let docs = inner.docs.entry(collection).or_default();
            let before = docs.len();
            docs.retain(|d| d.id != id);
            if docs.len() == before {
                return Err(StoreError::NotFound(format!("{collection}/{id}")));
            }
            inner.writes.push(WriteOp::Delete {
                collection,
                id: id.to_string(),
            });
        }
        self.publish(collection);
        Ok(())
    }

    async fn query_by_owner(
        &self,
        collection: Collection,
        owner_id: &str,
    ) -> StoreResult<Vec<Document>> {
        self.enter().await?;
        Ok(self
            .inner
            .borrow()
            .snapshot(collection, owner_id, OrderBy::CreatedAsc))
    }

    fn subscribe(
        &self,
        collection: Collection,
        owner_id: &str,
        order: OrderBy,
    ) -> LocalBoxStream<'static, StoreResult<Vec<Document>>> {
        let (tx, rx) = mpsc::unbounded();
        let mut inner = self.inner.borrow_mut();
        let _ = tx.unbounded_send(Ok(inner.snapshot(collection, owner_id, order)));
        inner.subscribers.push(Subscriber {
            collection,
            owner_id: owner_id.to_string(),
            order,
            tx,
        });
        rx.boxed_local()
    }
}
