//! Hierarchical document store.
//!
//! Documents are JSON objects addressed by slash separated paths that alternate
//! collection and document segments, e.g. `users/{uid}/decks/{deckId}/cards/{cardId}`.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::{error::StoreError, models::BinderKind};

pub type Document = Map<String, Value>;

/// Read-modify-write step run by [`DocumentStore::modify`]. Returning `None` deletes the document.
pub type Modifier = Box<dyn FnOnce(Option<Document>) -> Option<Document> + Send>;

const EVENT_BUFFER: usize = 256;

fn check_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidSegment(segment.to_owned()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Result<Self, StoreError> {
        check_segment(name)?;
        Ok(Self(name.to_owned()))
    }

    pub fn doc(&self, id: &str) -> Result<DocPath, StoreError> {
        check_segment(id)?;
        Ok(DocPath(format!("{}/{}", self.0, id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn collection(&self, name: &str) -> Result<CollectionPath, StoreError> {
        check_segment(name)?;
        Ok(CollectionPath(format!("{}/{}", self.0, name)))
    }

    /// Last segment of the path.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_owned()),
            None => CollectionPath(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `users/{uid}/{decks|collections}`
pub fn binders_path(owner: &str, kind: BinderKind) -> Result<CollectionPath, StoreError> {
    CollectionPath::root("users")?
        .doc(owner)?
        .collection(kind.segment())
}

/// `users/{uid}/{decks|collections}/{binderId}/cards`
pub fn cards_path(
    owner: &str,
    kind: BinderKind,
    binder_id: &str,
) -> Result<CollectionPath, StoreError> {
    binders_path(owner, kind)?.doc(binder_id)?.collection("cards")
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Serialization(serde::ser::Error::custom(
            format!("expected an object, got {other}"),
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(path: &str, doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|source| StoreError::Malformed {
        path: path.to_owned(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Set(Document),
    Deleted,
}

/// One entry of the live change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub path: DocPath,
    pub change: Change,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    /// Creates or replaces the document.
    async fn set(&self, path: &DocPath, doc: Document) -> Result<(), StoreError>;

    /// Merges `fields` into an existing document.
    async fn update(&self, path: &DocPath, fields: Document) -> Result<(), StoreError>;

    /// Removes the document. Sub-collections are left alone.
    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    /// Direct children of `collection`, ordered by id.
    async fn list(&self, collection: &CollectionPath)
        -> Result<Vec<(String, Document)>, StoreError>;

    /// Inserts under a generated id.
    async fn add(&self, collection: &CollectionPath, doc: Document)
        -> Result<DocPath, StoreError>;

    /// Atomically replaces the document with the result of `modifier`.
    async fn modify(&self, path: &DocPath, modifier: Modifier)
        -> Result<Option<Document>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Store kept in memory, optionally mirrored to a JSON file after every write.
pub struct LocalStore {
    docs: RwLock<BTreeMap<String, Document>>,
    file: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            docs: RwLock::new(BTreeMap::new()),
            file: None,
            events,
        }
    }

    /// Opens the store backed by `file`, loading it when it already exists.
    pub async fn open(file: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = file.into();
        let docs = match tokio::fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!("Opened document store at {}", file.display());

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            docs: RwLock::new(docs),
            file: Some(file),
            events,
        })
    }

    async fn persist(&self, docs: &BTreeMap<String, Document>) -> Result<(), StoreError> {
        if let Some(file) = &self.file {
            if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(file, serde_json::to_vec_pretty(docs)?).await?;
        }
        Ok(())
    }

    /// Writes `next` under `path` and persists. When persisting fails the map is
    /// restored, so an error leaves the store unchanged.
    async fn commit(
        &self,
        docs: &mut BTreeMap<String, Document>,
        path: &DocPath,
        next: Option<Document>,
    ) -> Result<(), StoreError> {
        let key = path.as_str();
        let previous = match next {
            Some(doc) => docs.insert(key.to_owned(), doc),
            None => docs.remove(key),
        };
        if let Err(e) = self.persist(docs).await {
            match previous {
                Some(doc) => docs.insert(key.to_owned(), doc),
                None => docs.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn publish(&self, path: &DocPath, change: Change) {
        // No receivers is fine.
        let _ = self.events.send(StoreEvent {
            path: path.clone(),
            change,
        });
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.read().await.get(path.as_str()).cloned())
    }

    async fn set(&self, path: &DocPath, doc: Document) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        self.commit(&mut docs, path, Some(doc.clone())).await?;
        debug!("set {}", path);
        self.publish(path, Change::Set(doc));
        Ok(())
    }

    async fn update(&self, path: &DocPath, fields: Document) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let mut updated = docs
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        updated.extend(fields);
        self.commit(&mut docs, path, Some(updated.clone())).await?;
        debug!("update {}", path);
        self.publish(path, Change::Set(updated));
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(path.as_str()) {
            self.commit(&mut docs, path, None).await?;
            debug!("delete {}", path);
            self.publish(path, Change::Deleted);
        }
        Ok(())
    }

    async fn list(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let prefix = format!("{}/", collection.as_str());
        let docs = self.docs.read().await;
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, doc)| {
                let id = &key[prefix.len()..];
                (!id.contains('/')).then(|| (id.to_owned(), doc.clone()))
            })
            .collect())
    }

    async fn add(
        &self,
        collection: &CollectionPath,
        doc: Document,
    ) -> Result<DocPath, StoreError> {
        let path = collection.doc(&Uuid::new_v4().simple().to_string())?;
        self.set(&path, doc).await?;
        Ok(path)
    }

    async fn modify(
        &self,
        path: &DocPath,
        modifier: Modifier,
    ) -> Result<Option<Document>, StoreError> {
        let mut docs = self.docs.write().await;
        let current = docs.get(path.as_str()).cloned();
        let existed = current.is_some();
        let next = modifier(current);
        if next.is_none() && !existed {
            return Ok(None);
        }

        self.commit(&mut docs, path, next.clone()).await?;
        debug!("modify {}", path);
        self.publish(
            path,
            next.clone().map(Change::Set).unwrap_or(Change::Deleted),
        );
        Ok(next)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn deck_cards() -> CollectionPath {
        cards_path("uid", BinderKind::Deck, "deck-1").unwrap()
    }

    #[test]
    fn paths_are_built_segment_by_segment() {
        let card = deck_cards().doc("card-1").unwrap();
        assert_eq!(card.as_str(), "users/uid/decks/deck-1/cards/card-1");
        assert_eq!(card.id(), "card-1");
        assert_eq!(card.parent(), deck_cards());
    }

    #[test]
    fn segments_with_slashes_are_rejected() {
        assert!(matches!(
            CollectionPath::root("users").unwrap().doc("a/b"),
            Err(StoreError::InvalidSegment(_))
        ));
        assert!(binders_path("", BinderKind::Collection).is_err());
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = LocalStore::in_memory();
        let path = deck_cards().doc("bolt").unwrap();
        store
            .set(&path, doc(json!({ "name": "Lightning Bolt", "counters": 1 })))
            .await
            .unwrap();

        let read = store.get(&path).await.unwrap().unwrap();
        assert_eq!(read["name"], json!("Lightning Bolt"));
        assert!(store
            .get(&deck_cards().doc("other").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_merges_fields_and_requires_existing_document() {
        let store = LocalStore::in_memory();
        let path = deck_cards().doc("bolt").unwrap();

        let missing = store.update(&path, doc(json!({ "counters": 2 }))).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        store
            .set(&path, doc(json!({ "name": "Lightning Bolt", "counters": 1 })))
            .await
            .unwrap();
        store
            .update(&path, doc(json!({ "counters": 2 })))
            .await
            .unwrap();

        let read = store.get(&path).await.unwrap().unwrap();
        assert_eq!(read["name"], json!("Lightning Bolt"));
        assert_eq!(read["counters"], json!(2));
    }

    #[tokio::test]
    async fn list_returns_only_direct_children() {
        let store = LocalStore::in_memory();
        let decks = binders_path("uid", BinderKind::Deck).unwrap();
        store
            .set(&decks.doc("deck-1").unwrap(), doc(json!({ "name": "Burn" })))
            .await
            .unwrap();
        store
            .set(&deck_cards().doc("bolt").unwrap(), doc(json!({ "counters": 4 })))
            .await
            .unwrap();
        store
            .set(
                &binders_path("uid", BinderKind::Collection)
                    .unwrap()
                    .doc("binder")
                    .unwrap(),
                doc(json!({ "name": "Trade binder" })),
            )
            .await
            .unwrap();

        let listed = store.list(&decks).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "deck-1");
        assert_eq!(listed[0].1["name"], json!("Burn"));
    }

    #[tokio::test]
    async fn add_generates_distinct_ids() {
        let store = LocalStore::in_memory();
        let decks = binders_path("uid", BinderKind::Deck).unwrap();
        let a = store.add(&decks, doc(json!({ "name": "A" }))).await.unwrap();
        let b = store.add(&decks, doc(json!({ "name": "B" }))).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(a.parent(), decks);
        assert_eq!(store.list(&decks).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_leaves_sub_collections() {
        let store = LocalStore::in_memory();
        let deck = binders_path("uid", BinderKind::Deck)
            .unwrap()
            .doc("deck-1")
            .unwrap();
        store.set(&deck, doc(json!({ "name": "Burn" }))).await.unwrap();
        store
            .set(&deck_cards().doc("bolt").unwrap(), doc(json!({ "counters": 4 })))
            .await
            .unwrap();

        store.delete(&deck).await.unwrap();
        assert!(store.get(&deck).await.unwrap().is_none());
        assert_eq!(store.list(&deck_cards()).await.unwrap().len(), 1);

        // deleting twice is not an error
        store.delete(&deck).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_modifies_do_not_lose_updates() {
        let store = Arc::new(LocalStore::in_memory());
        let path = deck_cards().doc("bolt").unwrap();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                let path = path.clone();
                tokio::spawn(async move {
                    store
                        .modify(
                            &path,
                            Box::new(|current| {
                                let count = current
                                    .as_ref()
                                    .and_then(|d| d["counters"].as_u64())
                                    .unwrap_or(0);
                                Some(doc(json!({ "counters": count + 1 })))
                            }),
                        )
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let read = store.get(&path).await.unwrap().unwrap();
        assert_eq!(read["counters"], json!(64));
    }

    #[tokio::test]
    async fn modify_returning_none_deletes() {
        let store = LocalStore::in_memory();
        let path = deck_cards().doc("bolt").unwrap();
        store.set(&path, doc(json!({ "counters": 1 }))).await.unwrap();

        let result = store.modify(&path, Box::new(|_| None)).await.unwrap();
        assert!(result.is_none());
        assert!(store.get(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_sets_and_deletes() {
        let store = LocalStore::in_memory();
        let mut events = store.subscribe();
        let path = deck_cards().doc("bolt").unwrap();

        store.set(&path, doc(json!({ "counters": 1 }))).await.unwrap();
        store.delete(&path).await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.path, path);
        assert_eq!(first.change, Change::Set(doc(json!({ "counters": 1 }))));
        let second = events.recv().await.unwrap();
        assert_eq!(second.change, Change::Deleted);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("nested").join("store.json");
        let path = deck_cards().doc("bolt").unwrap();

        {
            let store = LocalStore::open(&file).await.unwrap();
            store
                .set(&path, doc(json!({ "name": "Lightning Bolt", "counters": 3 })))
                .await
                .unwrap();
        }

        let reopened = LocalStore::open(&file).await.unwrap();
        let read = reopened.get(&path).await.unwrap().unwrap();
        assert_eq!(read["counters"], json!(3));
    }

    #[tokio::test]
    async fn failed_persist_leaves_the_store_unchanged() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("store.json");
        let path = deck_cards().doc("bolt").unwrap();
        let store = LocalStore::open(&file).await.unwrap();
        store.set(&path, doc(json!({ "counters": 1 }))).await.unwrap();
        let mut events = store.subscribe();

        // a directory where the file should be makes every write fail
        std::fs::remove_file(&file).unwrap();
        std::fs::create_dir(&file).unwrap();

        let other = deck_cards().doc("island").unwrap();
        assert!(store.set(&other, doc(json!({ "counters": 1 }))).await.is_err());
        assert!(store.get(&other).await.unwrap().is_none());

        assert!(store
            .update(&path, doc(json!({ "counters": 5 })))
            .await
            .is_err());
        assert!(store
            .modify(&path, Box::new(|_| Some(doc(json!({ "counters": 9 })))))
            .await
            .is_err());
        assert!(store.delete(&path).await.is_err());

        let read = store.get(&path).await.unwrap().unwrap();
        assert_eq!(read["counters"], json!(1));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn typed_documents_round_trip_through_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Named {
            name: String,
        }
        let as_doc = to_document(&Named { name: "Burn".to_owned() }).unwrap();
        let back: Named = from_document("users/uid/decks/d", as_doc).unwrap();
        assert_eq!(back.name, "Burn");

        assert!(to_document(&3).is_err());
        let malformed = from_document::<Named>("p", doc(json!({ "name": 1 })));
        assert!(matches!(malformed, Err(StoreError::Malformed { .. })));
    }
}
