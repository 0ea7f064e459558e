//! # Remote Document Store
//!
//! The seam between the sync engine and the tenant's cloud database.
//!
//! ## Layout
//! ```text
//! tenants/{tenant}                       tenant document (skuPrefix, storeName)
//! tenants/{tenant}/products/{id}         one document per catalog item
//! tenants/{tenant}/product_deletions/{id} tombstone per deleted item
//! tenants/{tenant}/invoices/{id}         one document per invoice
//! ```
//!
//! Writes that belong together go through [`WriteBatch`] and
//! [`RemoteStore::commit_batch`], which applies all of them or none.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// A document body: a JSON object.
pub type Document = Map<String, Value>;

// =============================================================================
// Paths
// =============================================================================

pub fn tenant_doc(tenant: &str) -> String {
    format!("tenants/{}", tenant)
}

pub fn products_collection(tenant: &str) -> String {
    format!("tenants/{}/products", tenant)
}

pub fn deletions_collection(tenant: &str) -> String {
    format!("tenants/{}/product_deletions", tenant)
}

pub fn invoices_collection(tenant: &str) -> String {
    format!("tenants/{}/invoices", tenant)
}

pub fn product_doc(tenant: &str, id: i64) -> String {
    format!("{}/{}", products_collection(tenant), id)
}

pub fn deletion_doc(tenant: &str, id: i64) -> String {
    format!("{}/{}", deletions_collection(tenant), id)
}

pub fn invoice_doc(tenant: &str, id: i64) -> String {
    format!("{}/{}", invoices_collection(tenant), id)
}

// =============================================================================
// Write Batch
// =============================================================================

/// How `set` treats fields already stored in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// The document becomes exactly the new body.
    Replace,
    /// Top-level fields in the new body overwrite, others stay.
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        path: String,
        data: Document,
        mode: SetMode,
    },
    Delete {
        path: String,
    },
}

/// Writes committed together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, data: Document, mode: SetMode) -> &mut Self {
        self.ops.push(WriteOp::Set {
            path: path.into(),
            data,
            mode,
        });
        self
    }

    pub fn delete(&mut self, path: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete { path: path.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

// =============================================================================
// Remote Store Trait
// =============================================================================

/// A hierarchical document store scoped by path.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &str) -> SyncResult<Option<Document>>;

    async fn set(&self, path: &str, data: Document, mode: SetMode) -> SyncResult<()>;

    async fn delete(&self, path: &str) -> SyncResult<()>;

    /// Direct children of `collection` as `(document id, body)` pairs.
    async fn list(&self, collection: &str) -> SyncResult<Vec<(String, Document)>>;

    /// Applies every write in `batch`, or none of them.
    async fn commit_batch(&self, batch: WriteBatch) -> SyncResult<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// A [`RemoteStore`] held in memory, with a switch that makes every call
/// fail as if the network were down.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    docs: RwLock<BTreeMap<String, Document>>,
    offline: AtomicBool,
    commits: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Batches committed successfully so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of documents directly under `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        let docs = self.docs.read().await;
        children(&docs, collection).count()
    }

    fn ensure_online(&self) -> SyncResult<()> {
        if self.is_offline() {
            return Err(SyncError::RemoteUnavailable("remote store is offline".into()));
        }
        Ok(())
    }

    fn apply(docs: &mut BTreeMap<String, Document>, op: WriteOp) {
        match op {
            WriteOp::Set {
                path,
                data,
                mode: SetMode::Replace,
            } => {
                docs.insert(path, data);
            }
            WriteOp::Set {
                path,
                data,
                mode: SetMode::Merge,
            } => {
                let doc = docs.entry(path).or_default();
                for (key, value) in data {
                    doc.insert(key, value);
                }
            }
            WriteOp::Delete { path } => {
                docs.remove(&path);
            }
        }
    }
}

fn children<'a>(
    docs: &'a BTreeMap<String, Document>,
    collection: &'a str,
) -> impl Iterator<Item = (&'a str, &'a Document)> + 'a {
    let prefix = format!("{}/", collection);
    docs.range(prefix.clone()..)
        .take_while(move |(path, _)| path.starts_with(&prefix))
        .filter_map(move |(path, doc)| {
            let id = &path[collection.len() + 1..];
            (!id.contains('/')).then_some((id, doc))
        })
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, path: &str) -> SyncResult<Option<Document>> {
        self.ensure_online()?;
        Ok(self.docs.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, data: Document, mode: SetMode) -> SyncResult<()> {
        self.ensure_online()?;
        let mut docs = self.docs.write().await;
        Self::apply(
            &mut docs,
            WriteOp::Set {
                path: path.to_string(),
                data,
                mode,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        self.ensure_online()?;
        self.docs.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, collection: &str) -> SyncResult<Vec<(String, Document)>> {
        self.ensure_online()?;
        let docs = self.docs.read().await;
        Ok(children(&docs, collection)
            .map(|(id, doc)| (id.to_string(), doc.clone()))
            .collect())
    }

    async fn commit_batch(&self, batch: WriteBatch) -> SyncResult<()> {
        self.ensure_online()?;
        let mut docs = self.docs.write().await;
        let writes = batch.len();
        for op in batch.into_ops() {
            Self::apply(&mut docs, op);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(writes, "Remote batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[tokio::test]
    async fn test_merge_keeps_unlisted_fields() {
        let store = InMemoryRemoteStore::new();
        let path = product_doc("t1", 7);

        store
            .set(&path, doc(json!({"name": "Cola", "imageUrl": "a.png"})), SetMode::Replace)
            .await
            .unwrap();
        store
            .set(&path, doc(json!({"name": "Cola Zero"})), SetMode::Merge)
            .await
            .unwrap();

        let stored = store.get(&path).await.unwrap().unwrap();
        assert_eq!(stored["name"], "Cola Zero");
        assert_eq!(stored["imageUrl"], "a.png");
    }

    #[tokio::test]
    async fn test_list_returns_direct_children_only() {
        let store = InMemoryRemoteStore::new();
        let mut batch = WriteBatch::new();
        batch
            .set(product_doc("t1", 1), doc(json!({"name": "A"})), SetMode::Replace)
            .set(product_doc("t1", 2), doc(json!({"name": "B"})), SetMode::Replace)
            .set(product_doc("t2", 3), doc(json!({"name": "C"})), SetMode::Replace)
            .set(tenant_doc("t1"), doc(json!({"skuPrefix": "ABC"})), SetMode::Replace);
        store.commit_batch(batch).await.unwrap();

        let listed = store.list(&products_collection("t1")).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(store.count(&products_collection("t2")).await, 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_rejects_everything() {
        let store = InMemoryRemoteStore::new();
        store.set_offline(true);

        let mut batch = WriteBatch::new();
        batch.delete(product_doc("t1", 1));
        let err = store.commit_batch(batch).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.list(&products_collection("t1")).await.is_err());
        assert_eq!(store.commit_count(), 0);

        store.set_offline(false);
        assert!(store.get(&tenant_doc("t1")).await.unwrap().is_none());
    }
}
