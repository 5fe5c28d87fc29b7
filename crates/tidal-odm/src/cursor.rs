//! Lazy batched cursors over a collection
//!
//! A cursor pages through the collection in primary key order. Each batch
//! takes an operation slot, reads up to `batch_size` matching documents whose
//! key sorts after the last one seen, and releases the slot before any
//! document is handed out. Nothing is read until the cursor is first polled.

use crate::connection::Link;
use crate::model::Model;
use async_stream::stream;
use bson::Document;
use futures::stream::{self, Stream, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tidal_common::{Result, TidalError};
use tidal_store::PRIMARY_KEY;
use tracing::debug;

/// Finite stream of model instances
pub struct Cursor<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
}

impl<T: Model> Cursor<T> {
    pub(crate) fn new(
        link: Link,
        collection: String,
        filter: Document,
        skip: u64,
        limit: Option<u64>,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let inner = stream! {
            let mut after: Option<String> = None;
            let mut skipped = 0u64;
            let mut yielded = 0u64;

            loop {
                if limit.is_some_and(|limit| yielded >= limit) {
                    break;
                }

                let batch = match fetch_batch(&link, &collection, after.as_deref(), &filter, batch_size).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                let exhausted = batch.len() < batch_size;
                debug!(collection = %collection, fetched = batch.len(), "Fetched cursor batch");

                for doc in batch {
                    match doc.get_str(PRIMARY_KEY) {
                        Ok(id) => after = Some(id.to_string()),
                        Err(_) => {
                            yield Err(TidalError::Internal(format!(
                                "document in '{}' has no string primary key",
                                collection
                            )));
                            return;
                        }
                    }
                    if skipped < skip {
                        skipped += 1;
                        continue;
                    }
                    if limit.is_some_and(|limit| yielded >= limit) {
                        break;
                    }
                    yielded += 1;
                    yield T::from_document(doc);
                }

                if exhausted {
                    break;
                }
            }
        };
        Self {
            inner: Box::pin(inner),
        }
    }

    /// A cursor whose only item is `error`
    pub(crate) fn failed(error: TidalError) -> Self {
        Self {
            inner: Box::pin(stream::once(futures::future::ready(Err(error)))),
        }
    }

    /// Drain the cursor into a vector, stopping at the first error
    pub async fn to_list(self) -> Result<Vec<T>> {
        self.try_collect().await
    }
}

impl<T> Stream for Cursor<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}

async fn fetch_batch(
    link: &Link,
    collection: &str,
    after: Option<&str>,
    filter: &Document,
    batch_size: usize,
) -> Result<Vec<Document>> {
    let _permit = link.acquire().await?;
    Ok(link.table(collection)?.scan(after, filter, batch_size))
}
