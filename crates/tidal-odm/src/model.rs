//! Model trait: persistence operations for document types
//!
//! Every document type implements `Model`. The trait supplies save, load,
//! bulk add, lookup, counting, dropping, cursors and change feeds on top of
//! serde conversion to and from BSON.

use crate::changes::{ChangeFeed, ChangeOptions};
use crate::connection::Connection;
use crate::cursor::Cursor;
use crate::query::{Filter, Query};
use crate::validation::{validate_document, ValidatedCollectionName};
use async_trait::async_trait;
use bson::Document;
use serde::{de::DeserializeOwned, Serialize};
use tidal_common::{Result, TidalError};
use tracing::{debug, info};

pub use tidal_store::WriteOutcome;

/// One field mapping or a sequence of them, as accepted by `Model::add`
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    One(Document),
    Many(Vec<Document>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Records::One(_) => 1,
            Records::Many(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<Document> {
        match self {
            Records::One(doc) => vec![doc],
            Records::Many(docs) => docs,
        }
    }
}

impl From<Document> for Records {
    fn from(doc: Document) -> Self {
        Records::One(doc)
    }
}

impl From<Vec<Document>> for Records {
    fn from(docs: Vec<Document>) -> Self {
        Records::Many(docs)
    }
}

impl<const N: usize> From<[Document; N]> for Records {
    fn from(docs: [Document; N]) -> Self {
        Records::Many(docs.into())
    }
}

/// Core trait for persisted document types
///
/// # Example
///
/// ```ignore
/// use serde::{Deserialize, Serialize};
/// use tidal_odm::Model;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Note {
///     #[serde(skip_serializing_if = "Option::is_none")]
///     id: Option<String>,
///     field: String,
/// }
///
/// impl Model for Note {
///     fn collection_name() -> &'static str {
///         "notes"
///     }
///
///     fn id(&self) -> Option<&str> {
///         self.id.as_deref()
///     }
///
///     fn set_id(&mut self, id: String) {
///         self.id = Some(id);
///     }
/// }
/// ```
///
/// The identifier must serialize under the `id` key.
#[async_trait]
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// Get the collection name for this document type
    fn collection_name() -> &'static str;

    /// The instance's identifier, if it has been assigned
    fn id(&self) -> Option<&str>;

    /// Store the identifier assigned by the server
    fn set_id(&mut self, id: String);

    /// Convert the instance to BSON
    fn to_document(&self) -> Result<Document> {
        Ok(bson::to_document(self)?)
    }

    /// Build an instance from BSON
    fn from_document(doc: Document) -> Result<Self> {
        Ok(bson::from_document(doc)?)
    }

    /// The validated collection name
    fn collection() -> Result<ValidatedCollectionName> {
        ValidatedCollectionName::new(Self::collection_name())
    }

    /// Insert or replace this instance
    ///
    /// Without an id the server assigns one, which is stored on the instance
    /// before returning. With an id the stored record is replaced, or inserted
    /// if absent. The collection is created on first write.
    async fn save(&mut self, conn: &Connection) -> Result<WriteOutcome> {
        let collection = Self::collection()?;
        let doc = self.to_document()?;
        let is_new = self.id().is_none();

        let link = conn.link();
        let _permit = link.acquire().await?;
        let table = link.ensure_table(collection.as_str())?;

        if is_new {
            let id = table.insert(doc)?;
            debug!(collection = %collection, id = %id, "Inserted document");
            self.set_id(id);
            Ok(WriteOutcome::Inserted)
        } else {
            let outcome = table.upsert(doc)?;
            debug!(collection = %collection, id = ?self.id(), outcome = ?outcome, "Saved document");
            Ok(outcome)
        }
    }

    /// Replace every field with the stored record's values
    async fn load(&mut self, conn: &Connection) -> Result<()> {
        let id = self
            .id()
            .map(str::to_string)
            .ok_or_else(|| TidalError::Validation("Cannot load a document without an id".to_string()))?;
        let collection = Self::collection()?;

        let link = conn.link();
        let _permit = link.acquire().await?;
        let doc = link
            .table(collection.as_str())?
            .get(&id)
            .ok_or_else(|| TidalError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
            })?;

        *self = Self::from_document(doc)?;
        Ok(())
    }

    /// Insert one mapping or many, returning the new instances
    ///
    /// Every mapping is checked against the model's schema before anything
    /// is written; a mapping that does not deserialize into `Self` fails the
    /// whole call with `TidalError::Validation`. The batch is stored
    /// atomically: a repeated or already-taken id fails the call with
    /// `TidalError::Conflict` and nothing is written.
    async fn add<R>(conn: &Connection, records: R) -> Result<Vec<Self>>
    where
        R: Into<Records> + Send,
    {
        let collection = Self::collection()?;
        let docs = records.into().into_vec();

        let mut added = Vec::with_capacity(docs.len());
        for doc in docs {
            validate_document(&doc)?;
            let instance = Self::from_document(doc).map_err(|e| {
                TidalError::Validation(format!(
                    "Record does not match the '{}' schema: {}",
                    collection, e
                ))
            })?;
            added.push(instance);
        }

        let link = conn.link();
        let _permit = link.acquire().await?;
        let table = link.ensure_table(collection.as_str())?;
        let docs = added
            .iter()
            .map(Self::to_document)
            .collect::<Result<Vec<_>>>()?;
        let ids = table.insert_many(docs)?;
        for (instance, id) in added.iter_mut().zip(ids) {
            instance.set_id(id);
        }
        debug!(collection = %collection, count = added.len(), "Added documents");
        Ok(added)
    }

    /// Whether a record with `id` exists
    async fn exists(conn: &Connection, id: &str) -> Result<bool> {
        let collection = Self::collection()?;
        let link = conn.link();
        let _permit = link.acquire().await?;
        Ok(link.table(collection.as_str())?.contains(id))
    }

    /// Number of records; `CollectionNotFound` if the collection is missing
    async fn count(conn: &Connection) -> Result<u64> {
        let collection = Self::collection()?;
        let link = conn.link();
        let _permit = link.acquire().await?;
        Ok(link.table(collection.as_str())?.len() as u64)
    }

    /// Remove the collection and every record in it
    ///
    /// Returns whether the collection existed.
    async fn drop_collection(conn: &Connection) -> Result<bool> {
        let collection = Self::collection()?;
        let link = conn.link();
        let _permit = link.acquire().await?;
        let dropped = link.database()?.table_drop(collection.as_str());
        if dropped {
            info!(collection = %collection, db = %conn.database_name(), "Dropped collection");
        }
        Ok(dropped)
    }

    /// Find a record by id; `None` when there is no such record
    async fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        let collection = Self::collection()?;
        let link = conn.link();
        let _permit = link.acquire().await?;
        link.table(collection.as_str())?
            .get(id)
            .map(Self::from_document)
            .transpose()
    }

    /// First record in key order matching `filter`
    async fn find_one<F>(conn: &Connection, filter: F) -> Result<Option<Self>>
    where
        F: Into<Filter> + Send,
    {
        let collection = Self::collection()?;
        let filter = filter.into();
        filter.validate()?;

        let link = conn.link();
        let _permit = link.acquire().await?;
        link.table(collection.as_str())?
            .find_first(filter.as_document())
            .map(Self::from_document)
            .transpose()
    }

    /// Lazily stream records matching `filter`
    fn find(conn: &Connection, filter: impl Into<Filter>) -> Cursor<Self> {
        Self::query().filter(filter).cursor(conn)
    }

    /// Lazily stream every record
    fn find_all(conn: &Connection) -> Cursor<Self> {
        Self::query().cursor(conn)
    }

    /// Query builder over this collection
    fn query() -> Query<Self> {
        Query::new()
    }

    /// Delete this record; returns whether it existed
    async fn delete(&self, conn: &Connection) -> Result<bool> {
        let id = self
            .id()
            .ok_or_else(|| TidalError::Validation("Cannot delete a document without an id".to_string()))?;
        Self::delete_by_id(conn, id).await
    }

    /// Delete the record with `id`; returns whether it existed
    async fn delete_by_id(conn: &Connection, id: &str) -> Result<bool> {
        let collection = Self::collection()?;
        let link = conn.link();
        let _permit = link.acquire().await?;
        let deleted = link.table(collection.as_str())?.delete(id).is_some();
        debug!(collection = %collection, id = %id, deleted, "Deleted document");
        Ok(deleted)
    }

    /// Change feed for this record
    async fn changes(&self, conn: &Connection) -> Result<ChangeFeed<Self>> {
        self.changes_with(conn, ChangeOptions::default()).await
    }

    /// Change feed for this record, with options
    async fn changes_with(&self, conn: &Connection, options: ChangeOptions) -> Result<ChangeFeed<Self>> {
        let id = self
            .id()
            .map(str::to_string)
            .ok_or_else(|| TidalError::Validation("Cannot watch a document without an id".to_string()))?;
        let collection = Self::collection()?;
        ChangeFeed::open(conn.link(), collection.as_str(), Some(id), options).await
    }

    /// Change feed for the whole collection
    async fn watch(conn: &Connection) -> Result<ChangeFeed<Self>> {
        Self::watch_with(conn, ChangeOptions::default()).await
    }

    /// Change feed for the whole collection, with options
    async fn watch_with(conn: &Connection, options: ChangeOptions) -> Result<ChangeFeed<Self>> {
        let collection = Self::collection()?;
        ChangeFeed::open(conn.link(), collection.as_str(), None, options).await
    }
}
