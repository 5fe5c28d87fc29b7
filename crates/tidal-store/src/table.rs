//! Tables: primary-key ordered document storage with a change feed
//!
//! Rows live in a `BTreeMap` keyed by primary key behind a `RwLock`.
//! Generated keys are ObjectId hex strings: they sort by creation second and
//! then by a per-process counter, which usually but not always matches
//! insertion order. Every committed write is published on the
//! table's broadcast channel while the write lock is still held, which keeps
//! subscribers in commit order.

use crate::change::ChangeEvent;
use crate::filter;
use bson::{oid::ObjectId, Bson, Document};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use tidal_common::{Result, TidalError};
use tokio::sync::broadcast;
use tracing::debug;

/// Name of the primary key field in every stored document
pub const PRIMARY_KEY: &str = "id";

/// Result of a replace-or-insert write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new document was stored
    Inserted,
    /// An existing document was replaced with different content
    Replaced,
    /// The stored document was already identical; nothing was published
    Unchanged,
}

/// A single table of documents
pub struct Table {
    name: String,
    rows: RwLock<BTreeMap<String, Document>>,
    /// Taken on drop so open feeds observe the channel closing
    changes: Mutex<Option<broadcast::Sender<ChangeEvent>>>,
}

impl Table {
    /// Create an empty table whose change channel buffers `change_buffer` events
    pub fn new(name: impl Into<String>, change_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(change_buffer.max(1));
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            changes: Mutex::new(Some(tx)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a new document, generating its primary key if absent
    ///
    /// Returns the primary key. Fails with `Conflict` if the key is taken.
    pub fn insert(&self, mut doc: Document) -> Result<String> {
        let id = match primary_key(&doc)? {
            Some(id) => id,
            None => {
                let id = ObjectId::new().to_hex();
                doc.insert(PRIMARY_KEY, id.clone());
                id
            }
        };

        let mut rows = self.rows.write();
        if rows.contains_key(&id) {
            return Err(TidalError::Conflict(format!(
                "duplicate primary key '{}' in table '{}'",
                id, self.name
            )));
        }
        rows.insert(id.clone(), doc.clone());
        self.publish(ChangeEvent::from_write(&self.name, &id, None, Some(doc)));
        debug!(table = %self.name, id = %id, "inserted document");

        Ok(id)
    }

    /// Insert a batch of documents atomically
    ///
    /// Keys are generated for documents without one. If any key is repeated
    /// within the batch or already taken, nothing is written and the call
    /// fails with `Conflict`. Returns the keys in input order.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        let mut keyed = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = match primary_key(&doc)? {
                Some(id) => id,
                None => {
                    let id = ObjectId::new().to_hex();
                    doc.insert(PRIMARY_KEY, id.clone());
                    id
                }
            };
            keyed.push((id, doc));
        }

        let mut rows = self.rows.write();
        let mut seen = HashSet::with_capacity(keyed.len());
        for (id, _) in &keyed {
            if rows.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(TidalError::Conflict(format!(
                    "duplicate primary key '{}' in table '{}'",
                    id, self.name
                )));
            }
        }

        let mut ids = Vec::with_capacity(keyed.len());
        for (id, doc) in keyed {
            rows.insert(id.clone(), doc.clone());
            self.publish(ChangeEvent::from_write(&self.name, &id, None, Some(doc)));
            ids.push(id);
        }
        debug!(table = %self.name, count = ids.len(), "inserted documents");

        Ok(ids)
    }

    /// Replace the document with the same primary key, inserting it if absent
    pub fn upsert(&self, doc: Document) -> Result<WriteOutcome> {
        let id = primary_key(&doc)?.ok_or_else(|| {
            TidalError::Validation(format!(
                "replace into '{}' requires a '{}' field",
                self.name, PRIMARY_KEY
            ))
        })?;

        let mut rows = self.rows.write();
        let outcome = match rows.get(&id) {
            Some(existing) if *existing == doc => WriteOutcome::Unchanged,
            Some(_) => WriteOutcome::Replaced,
            None => WriteOutcome::Inserted,
        };
        if outcome == WriteOutcome::Unchanged {
            return Ok(outcome);
        }

        let old = rows.insert(id.clone(), doc.clone());
        self.publish(ChangeEvent::from_write(&self.name, &id, old, Some(doc)));
        debug!(table = %self.name, id = %id, outcome = ?outcome, "replaced document");

        Ok(outcome)
    }

    /// Fetch a document by primary key
    pub fn get(&self, id: &str) -> Option<Document> {
        self.rows.read().get(id).cloned()
    }

    /// Check if a primary key is present
    pub fn contains(&self, id: &str) -> bool {
        self.rows.read().contains_key(id)
    }

    /// Delete a document, returning it if it existed
    pub fn delete(&self, id: &str) -> Option<Document> {
        let mut rows = self.rows.write();
        let old = rows.remove(id)?;
        self.publish(ChangeEvent::from_write(&self.name, id, Some(old.clone()), None));
        debug!(table = %self.name, id = %id, "deleted document");
        Some(old)
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Return up to `limit` documents matching `filter` whose primary key sorts
    /// strictly after `after`
    ///
    /// Cursors page through a table by feeding the last key of one batch into
    /// the next call.
    pub fn scan(&self, after: Option<&str>, filter: &Document, limit: usize) -> Vec<Document> {
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };
        let rows = self.rows.read();
        rows.range::<String, _>((lower, Bound::Unbounded))
            .map(|(_, doc)| doc)
            .filter(|doc| filter::matches(doc, filter))
            .take(limit)
            .cloned()
            .collect()
    }

    /// First document in key order matching `filter`
    pub fn find_first(&self, filter: &Document) -> Option<Document> {
        self.rows
            .read()
            .values()
            .find(|doc| filter::matches(doc, filter))
            .cloned()
    }

    /// Count documents matching `filter`
    pub fn count_matching(&self, filter: &Document) -> usize {
        self.rows
            .read()
            .values()
            .filter(|doc| filter::matches(doc, filter))
            .count()
    }

    /// Register a change subscriber
    ///
    /// Every write committed after this call is delivered to the receiver.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<ChangeEvent>> {
        self.changes
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| TidalError::CollectionNotFound(self.name.clone()))
    }

    /// Subscribe and snapshot atomically with respect to writers
    ///
    /// The snapshot holds exactly the documents committed before the
    /// subscription, so replaying it and then following the receiver neither
    /// misses nor repeats a write.
    pub fn subscribe_with_snapshot(
        &self,
        filter: &Document,
    ) -> Result<(broadcast::Receiver<ChangeEvent>, Vec<Document>)> {
        let rows = self.rows.read();
        let receiver = self.subscribe()?;
        let snapshot = rows
            .values()
            .filter(|doc| filter::matches(doc, filter))
            .cloned()
            .collect();
        Ok((receiver, snapshot))
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.changes
            .lock()
            .as_ref()
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// Close the change channel; open feeds drain and then end
    pub fn close_feeds(&self) {
        self.changes.lock().take();
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(tx) = self.changes.lock().as_ref() {
            // No receivers is not an error
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Extract the primary key; `None` when absent or null
fn primary_key(doc: &Document) -> Result<Option<String>> {
    match doc.get(PRIMARY_KEY) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::String(id)) if !id.is_empty() => Ok(Some(id.clone())),
        Some(other) => Err(TidalError::Validation(format!(
            "primary key '{}' must be a non-empty string, got {}",
            PRIMARY_KEY, other
        ))),
    }
}
