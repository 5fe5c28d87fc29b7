//! Equality filters and the query builder

use crate::connection::Connection;
use crate::cursor::Cursor;
use crate::model::Model;
use crate::validation::{validate_document, ValidatedCollectionName};
use bson::{Bson, Document};
use futures::StreamExt;
use std::marker::PhantomData;
use tidal_common::Result;

/// Field-equality filter
///
/// A document matches when every listed field equals the given value.
/// Field names may be dotted paths into nested documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    doc: Document,
}

impl Filter {
    /// Empty filter; matches every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.doc.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    /// Reject operator keys and malformed field names
    pub fn validate(&self) -> Result<()> {
        validate_document(&self.doc)
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self { doc }
    }
}

/// Query builder for find operations on one model's collection
pub struct Query<T> {
    filter: Filter,
    skip: u64,
    limit: Option<u64>,
    batch_size: Option<usize>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model> Query<T> {
    /// Create a query matching every document of `T`
    pub fn new() -> Self {
        Self {
            filter: Filter::new(),
            skip: 0,
            limit: None,
            batch_size: None,
            _model: PhantomData,
        }
    }

    /// Set the filter
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Set the number of matching documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of documents fetched per round trip
    ///
    /// Defaults to the connection's `PoolConfig::batch_size`.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Get the collection name
    pub fn collection_name(&self) -> &'static str {
        T::collection_name()
    }

    /// Get the filter
    pub fn get_filter(&self) -> &Filter {
        &self.filter
    }

    /// Get the skip value
    pub fn get_skip(&self) -> u64 {
        self.skip
    }

    /// Get the limit value
    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Get the batch size, if one was set
    pub fn get_batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Lazily stream matching documents
    ///
    /// Invalid names surface as the cursor's first item.
    pub fn cursor(self, conn: &Connection) -> Cursor<T> {
        if let Err(e) = self.check() {
            return Cursor::failed(e);
        }
        let batch_size = self
            .batch_size
            .unwrap_or(conn.pool_config().batch_size);
        Cursor::new(
            conn.link().clone(),
            T::collection_name().to_string(),
            self.filter.into_document(),
            self.skip,
            self.limit,
            batch_size,
        )
    }

    /// Execute the query and return all matching documents
    pub async fn to_list(self, conn: &Connection) -> Result<Vec<T>> {
        self.cursor(conn).to_list().await
    }

    /// Execute the query and return the first matching document
    pub async fn first(self, conn: &Connection) -> Result<Option<T>> {
        let mut cursor = self.limit(1).cursor(conn);
        cursor.next().await.transpose()
    }

    /// Count matching documents, honouring skip and limit
    pub async fn count(self, conn: &Connection) -> Result<u64> {
        self.check()?;
        let link = conn.link();
        let _permit = link.acquire().await?;
        let matched = link
            .table(T::collection_name())?
            .count_matching(self.filter.as_document()) as u64;
        let remaining = matched.saturating_sub(self.skip);
        Ok(self.limit.map_or(remaining, |limit| remaining.min(limit)))
    }

    fn check(&self) -> Result<()> {
        ValidatedCollectionName::new(T::collection_name())?;
        self.filter.validate()
    }
}

impl<T: Model> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
