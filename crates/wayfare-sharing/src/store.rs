//! Document store abstraction and the in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use crate::error::SharingError;

/// Stored JSON object plus its id within the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    /// Deserialize the document body.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, SharingError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            SharingError::InvalidDocument {
                id: self.id.clone(),
                message: e.to_string(),
            }
        })
    }
}

/// Serialize a value into a document body.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>, SharingError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SharingError::InvalidDocument {
            id: String::new(),
            message: format!("expected an object, got {}", other),
        }),
    }
}

/// Single-field query filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field` is an array containing `value`
    ArrayContains { field: String, value: Value },
    /// `field` equals `value`
    Equals { field: String, value: Value },
}

impl Filter {
    pub fn array_contains(field: &str, value: impl Into<Value>) -> Self {
        Self::ArrayContains {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        match self {
            Filter::ArrayContains { field, value } => data
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
            Filter::Equals { field, value } => data.get(field) == Some(value),
        }
    }
}

/// Query results pushed by a listener, one full snapshot per change.
pub type Snapshot = Result<Vec<Document>, SharingError>;

/// Receiving end of a listener. Dropping it stops the listener.
pub type DocumentStream = mpsc::Receiver<Snapshot>;

/// Capacity of listener channels.
pub(crate) const LISTEN_BUFFER: usize = 16;

/// Minimal document database used for sharing grants and trips.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert with a store-generated id; returns the id.
    async fn add(&self, collection: &str, data: Map<String, Value>) -> Result<String, SharingError>;

    /// Create or replace the document with the given id.
    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), SharingError>;

    /// Replace an existing document. Fails with `NotFound` if it is absent.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), SharingError>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), SharingError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, SharingError>;

    /// Documents matching `filter`, ordered by id.
    async fn query(&self, collection: &str, filter: &Filter)
        -> Result<Vec<Document>, SharingError>;

    /// Stream the result of `query` now and after every change to it.
    fn listen(&self, collection: &str, filter: Filter) -> DocumentStream;
}

type Collections = HashMap<String, BTreeMap<String, Map<String, Value>>>;

/// Process-local document store with a change feed.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
    // Carries the name of the collection that changed.
    changes: broadcast::Sender<String>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            collections: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn notify(&self, collection: &str) {
        // No receivers is fine
        let _ = self.changes.send(collection.to_string());
    }

    fn query_now(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        self.collections
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| filter.matches(data))
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn add(&self, collection: &str, data: Map<String, Value>) -> Result<String, SharingError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), data);
        self.notify(collection);
        Ok(id)
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), SharingError> {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        self.notify(collection);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
    ) -> Result<(), SharingError> {
        {
            let mut collections = self.collections.lock();
            let existing = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| SharingError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            *existing = data;
        }
        self.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), SharingError> {
        let removed = self
            .collections
            .lock()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            self.notify(collection);
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, SharingError> {
        Ok(self
            .collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, SharingError> {
        Ok(self.query_now(collection, filter))
    }

    fn listen(&self, collection: &str, filter: Filter) -> DocumentStream {
        let (tx, rx) = mpsc::channel(LISTEN_BUFFER);
        // Subscribe before the first snapshot so no change is missed.
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let collection = collection.to_string();

        tokio::spawn(async move {
            let mut last: Option<Vec<Document>> = None;
            loop {
                let snapshot = store.query_now(&collection, &filter);
                if last.as_ref() != Some(&snapshot) {
                    if tx.send(Ok(snapshot.clone())).await.is_err() {
                        return;
                    }
                    last = Some(snapshot);
                }

                loop {
                    tokio::select! {
                        _ = tx.closed() => return,
                        change = changes.recv() => match change {
                            Ok(changed) if changed == collection => break,
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => break,
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_crud() {
        let store = InMemoryDocumentStore::new();

        let id = store.add("trips", doc(json!({"title": "Lisbon"}))).await.unwrap();
        let fetched = store.get("trips", &id).await.unwrap().unwrap();
        assert_eq!(fetched.data["title"], "Lisbon");

        store
            .update("trips", &id, doc(json!({"title": "Porto"})))
            .await
            .unwrap();
        assert_eq!(
            store.get("trips", &id).await.unwrap().unwrap().data["title"],
            "Porto"
        );

        store.delete("trips", &id).await.unwrap();
        assert!(store.get("trips", &id).await.unwrap().is_none());
        store.delete("trips", &id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryDocumentStore::new();

        let err = store
            .update("trips", "nope", doc(json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, SharingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = InMemoryDocumentStore::new();
        store
            .set("g", "a", doc(json!({"sharedWith": ["x@e.com", "y@e.com"], "tripId": "a"})))
            .await
            .unwrap();
        store
            .set("g", "b", doc(json!({"sharedWith": ["y@e.com"], "tripId": "b"})))
            .await
            .unwrap();

        let contains = store
            .query("g", &Filter::array_contains("sharedWith", "x@e.com"))
            .await
            .unwrap();
        assert_eq!(contains.len(), 1);
        assert_eq!(contains[0].id, "a");

        let equals = store
            .query("g", &Filter::equals("tripId", "b"))
            .await
            .unwrap();
        assert_eq!(equals[0].id, "b");

        assert!(store
            .query("missing", &Filter::equals("tripId", "b"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_listen_pushes_changes() {
        let store = InMemoryDocumentStore::new();
        let mut stream = store.listen("g", Filter::array_contains("sharedWith", "x@e.com"));

        let initial = stream.recv().await.unwrap().unwrap();
        assert!(initial.is_empty());

        // Unrelated collection and non-matching docs produce no snapshot
        store.set("other", "z", doc(json!({}))).await.unwrap();
        store
            .set("g", "b", doc(json!({"sharedWith": ["y@e.com"]})))
            .await
            .unwrap();
        store
            .set("g", "a", doc(json!({"sharedWith": ["x@e.com"]})))
            .await
            .unwrap();

        let next = stream.recv().await.unwrap().unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "a");

        store.delete("g", "a").await.unwrap();
        assert!(stream.recv().await.unwrap().unwrap().is_empty());
    }
}
