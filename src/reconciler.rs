//! Keeps the open deck or binder in step with the document store.
//!
//! Every mutation is applied to the local [`CardCounts`] first and then written
//! through to the store. Store failures are logged and the local change stays,
//! so the two can drift apart until the next reload.

use std::{fmt, sync::Arc};

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::{
    counts::{CardCounts, Mutation},
    error::{AppError, StoreError},
    export::{self, ExportFile},
    models::{Binder, BinderDoc, BinderKind, Card, CardEntry},
    store::{
        binders_path, cards_path, from_document, to_document, Change, Document, DocumentStore,
        StoreEvent,
    },
};

pub type SharedStore = Arc<dyn DocumentStore>;

const COUNT_FIELD: &str = "counters";

fn stored_count(doc: &Document) -> u64 {
    doc.get(COUNT_FIELD).and_then(Value::as_u64).unwrap_or(0)
}

/// Store operations for one owner and binder kind, detached from local state so
/// they can be moved into futures.
#[derive(Clone)]
pub struct Remote {
    store: SharedStore,
    owner: String,
    kind: BinderKind,
}

impl Remote {
    pub fn new(store: SharedStore, owner: &str, kind: BinderKind) -> Self {
        Self {
            store,
            owner: owner.to_owned(),
            kind,
        }
    }

    pub fn kind(&self) -> BinderKind {
        self.kind
    }

    pub async fn list_binders(&self) -> Result<Vec<Binder>, StoreError> {
        let docs = self.store.list(&binders_path(&self.owner, self.kind)?).await?;
        Ok(docs
            .into_iter()
            .filter_map(|(id, doc)| match from_document::<BinderDoc>(&id, doc) {
                Ok(binder) => Some(Binder {
                    id,
                    name: binder.name,
                    kind: self.kind,
                }),
                Err(e) => {
                    warn!("Skipping {}: {}", id, e);
                    None
                }
            })
            .collect())
    }

    pub async fn create_binder(&self, name: String) -> Result<Binder, StoreError> {
        let doc = to_document(&BinderDoc { name: name.clone() })?;
        let path = self
            .store
            .add(&binders_path(&self.owner, self.kind)?, doc)
            .await?;
        info!("Created {} '{}'", path, name);
        Ok(Binder {
            id: path.id().to_owned(),
            name,
            kind: self.kind,
        })
    }

    pub async fn rename_binder(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let path = binders_path(&self.owner, self.kind)?.doc(id)?;
        self.store
            .update(&path, to_document(&BinderDoc { name: name.to_owned() })?)
            .await
    }

    /// Deletes the binder's cards, then the binder itself.
    pub async fn delete_binder(&self, id: &str) -> Result<(), StoreError> {
        let cards = cards_path(&self.owner, self.kind, id)?;
        for (card_id, _) in self.store.list(&cards).await? {
            self.store.delete(&cards.doc(&card_id)?).await?;
        }
        self.store
            .delete(&binders_path(&self.owner, self.kind)?.doc(id)?)
            .await
    }

    pub async fn load_entries(
        &self,
        binder_id: &str,
    ) -> Result<Vec<(String, CardEntry)>, StoreError> {
        let docs = self
            .store
            .list(&cards_path(&self.owner, self.kind, binder_id)?)
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|(id, doc)| match from_document::<CardEntry>(&id, doc) {
                Ok(entry) => Some((id, entry)),
                Err(e) => {
                    warn!("Skipping card {}: {}", id, e);
                    None
                }
            })
            .collect())
    }

    /// Applies `mutation` atomically and returns the stored entry afterwards.
    pub async fn push(
        &self,
        binder_id: &str,
        mutation: Mutation,
    ) -> Result<Option<CardEntry>, StoreError> {
        let path = cards_path(&self.owner, self.kind, binder_id)?.doc(mutation.card_id())?;

        let stored = match mutation {
            Mutation::Increment { seed, by, .. } => {
                let seed = to_document(&seed)?;
                self.store
                    .modify(
                        &path,
                        Box::new(move |current| {
                            Some(match current {
                                Some(mut doc) => {
                                    let count = stored_count(&doc) + u64::from(by);
                                    doc.insert(COUNT_FIELD.to_owned(), Value::from(count));
                                    doc
                                }
                                None => seed,
                            })
                        }),
                    )
                    .await?
            }
            Mutation::Decrement { .. } => {
                self.store
                    .modify(
                        &path,
                        Box::new(|current| {
                            current.and_then(|mut doc| {
                                let count = stored_count(&doc);
                                (count > 1).then(|| {
                                    doc.insert(COUNT_FIELD.to_owned(), Value::from(count - 1));
                                    doc
                                })
                            })
                        }),
                    )
                    .await?
            }
        };

        stored
            .map(|doc| from_document(path.as_str(), doc))
            .transpose()
    }

    pub async fn export(&self, binder_id: &str) -> Result<ExportFile, AppError> {
        let path = binders_path(&self.owner, self.kind)?.doc(binder_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| AppError::BinderNotFound(binder_id.to_owned()))?;
        let binder = Binder {
            id: binder_id.to_owned(),
            name: from_document::<BinderDoc>(path.as_str(), doc)?.name,
            kind: self.kind,
        };
        let entries = self.load_entries(binder_id).await?;
        Ok(export::render(&binder, entries.iter().map(|(_, e)| e)))
    }
}

/// Local state of one binder page: the binder list and at most one open binder.
pub struct Reconciler {
    remote: Remote,
    binders: Vec<Binder>,
    selected: Option<Binder>,
    counts: CardCounts,
}

impl Reconciler {
    pub fn new(store: SharedStore, owner: &str, kind: BinderKind) -> Self {
        Self {
            remote: Remote::new(store, owner, kind),
            binders: Vec::new(),
            selected: None,
            counts: CardCounts::default(),
        }
    }

    pub fn remote(&self) -> Remote {
        self.remote.clone()
    }

    pub fn kind(&self) -> BinderKind {
        self.remote.kind
    }

    pub fn binders(&self) -> &[Binder] {
        &self.binders
    }

    pub fn selected(&self) -> Option<&Binder> {
        self.selected.as_ref()
    }

    pub fn counts(&self) -> &CardCounts {
        &self.counts
    }

    pub fn next_default_name(&self) -> String {
        self.kind().default_name(self.binders.len())
    }

    pub fn set_binders(&mut self, binders: Vec<Binder>) {
        self.binders = binders;
        if let Some(selected) = &self.selected {
            if !self.binders.iter().any(|b| b.id == selected.id) {
                self.close();
            }
        }
    }

    /// Opens `id` with an empty card list; entries arrive through [`Self::finish_select`].
    pub fn begin_select(&mut self, id: &str) -> Result<Binder, AppError> {
        let binder = self
            .binders
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| AppError::BinderNotFound(id.to_owned()))?;
        self.counts.clear();
        self.selected = Some(binder.clone());
        Ok(binder)
    }

    /// Replaces the card list wholesale. Returns false if `id` is no longer open.
    pub fn finish_select(&mut self, id: &str, entries: Vec<(String, CardEntry)>) -> bool {
        if self.selected.as_ref().map(|b| b.id.as_str()) != Some(id) {
            debug!("Ignoring entries for {}, no longer open", id);
            return false;
        }
        self.counts = CardCounts::from_entries(entries);
        true
    }

    pub fn close(&mut self) {
        self.selected = None;
        self.counts.clear();
    }

    fn selected_id(&self) -> Result<String, AppError> {
        self.selected
            .as_ref()
            .map(|b| b.id.clone())
            .ok_or(AppError::NoBinderSelected)
    }

    /// Adds `copies` locally. The returned mutation still has to be pushed.
    pub fn stage_add(&mut self, card: &Card, copies: u32) -> Result<(String, Mutation), AppError> {
        let binder_id = self.selected_id()?;
        Ok((binder_id, self.counts.increment(card, copies)))
    }

    /// Removes one copy locally; `None` when the card is not in the binder.
    pub fn stage_remove(&mut self, card_id: &str) -> Result<Option<(String, Mutation)>, AppError> {
        let binder_id = self.selected_id()?;
        Ok(self.counts.decrement(card_id).map(|m| (binder_id, m)))
    }

    /// Outcome of a pushed mutation. Failures are logged; the local change is kept.
    pub fn confirm<E: fmt::Display>(&self, card_id: &str, result: &Result<Option<CardEntry>, E>) {
        match result {
            Ok(entry) => debug!(
                "Stored {} x{}",
                card_id,
                entry.as_ref().map(|e| e.count).unwrap_or(0)
            ),
            Err(e) => error!("Error writing card {}: {}", card_id, e),
        }
    }

    pub fn binder_created(&mut self, binder: Binder) {
        // the change feed may have listed it already
        if !self.binders.iter().any(|b| b.id == binder.id) {
            self.binders.push(binder.clone());
        }
        self.counts.clear();
        self.selected = Some(binder);
    }

    pub fn binder_renamed(&mut self, id: &str, name: &str) {
        for binder in self
            .binders
            .iter_mut()
            .chain(self.selected.iter_mut())
            .filter(|b| b.id == id)
        {
            binder.name = name.to_owned();
        }
    }

    pub fn binder_deleted(&mut self, id: &str) {
        self.binders.retain(|b| b.id != id);
        if self.selected.as_ref().is_some_and(|b| b.id == id) {
            self.close();
        }
    }

    /// Applies a change feed event. Returns true when local state changed.
    pub fn apply_event(&mut self, event: &StoreEvent) -> bool {
        let parent = event.path.parent();
        let id = event.path.id();

        if binders_path(&self.remote.owner, self.kind()).ok() == Some(parent.clone()) {
            return match &event.change {
                Change::Set(doc) => match from_document::<BinderDoc>(id, doc.clone()) {
                    Ok(doc) if self.binders.iter().any(|b| b.id == id) => {
                        self.binder_renamed(id, &doc.name);
                        true
                    }
                    Ok(doc) => {
                        self.binders.push(Binder {
                            id: id.to_owned(),
                            name: doc.name,
                            kind: self.kind(),
                        });
                        true
                    }
                    Err(e) => {
                        warn!("Ignoring binder event: {}", e);
                        false
                    }
                },
                Change::Deleted => {
                    self.binder_deleted(id);
                    true
                }
            };
        }

        let Some(selected) = &self.selected else {
            return false;
        };
        if cards_path(&self.remote.owner, self.kind(), &selected.id).ok() != Some(parent) {
            return false;
        }
        match &event.change {
            Change::Set(doc) => match from_document::<CardEntry>(id, doc.clone()) {
                Ok(entry) => self.counts.put(id, Some(entry)),
                Err(e) => {
                    warn!("Ignoring card event: {}", e);
                    return false;
                }
            },
            Change::Deleted => self.counts.put(id, None),
        }
        true
    }
}
