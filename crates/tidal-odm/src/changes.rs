//! Change feeds for documents and collections

use crate::connection::Link;
use crate::model::Model;
use async_stream::stream;
use bson::Document;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tidal_common::{Result, TidalError};
use tidal_store::{ChangeEvent, ChangeKind, PRIMARY_KEY};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Options for opening a change feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeOptions {
    /// Replay the current state as `ChangeKind::Initial` before live changes
    pub include_initial: bool,
}

impl ChangeOptions {
    pub fn include_initial(mut self, include_initial: bool) -> Self {
        self.include_initial = include_initial;
        self
    }
}

/// One notification, decoded into the model type
#[derive(Debug, Clone)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub id: String,
    pub old_val: Option<T>,
    pub new_val: Option<T>,
    /// Commit time; replay time for `Initial`
    pub at: DateTime<Utc>,
}

impl<T: Model> Change<T> {
    fn from_event(event: ChangeEvent) -> Result<Self> {
        Ok(Self {
            kind: event.kind,
            id: event.id,
            old_val: event.old_val.map(T::from_document).transpose()?,
            new_val: event.new_val.map(T::from_document).transpose()?,
            at: event.at,
        })
    }
}

/// Unbounded stream of changes
///
/// The subscription exists as soon as the feed is returned. Falling behind
/// the server's change buffer yields one `TidalError::Transient` and the feed
/// carries on; dropping the collection yields `CollectionNotFound` and ends it.
/// Closing the connection the feed was opened on yields
/// `TidalError::Connection` and ends it.
///
/// The buffer is shared by the whole collection, so a per-document feed can
/// report `Transient` after a burst of writes to other documents even though
/// none of its own notifications were lost.
pub struct ChangeFeed<T> {
    inner: Pin<Box<dyn Stream<Item = Result<Change<T>>> + Send>>,
}

impl<T: Model> ChangeFeed<T> {
    /// Subscribe to `collection`, or to one document of it when `id` is set
    pub(crate) async fn open(
        link: &Link,
        collection: &str,
        id: Option<String>,
        options: ChangeOptions,
    ) -> Result<Self> {
        let _permit = link.acquire().await?;
        let table = link.table(collection)?;

        let (mut receiver, snapshot) = if options.include_initial {
            let mut filter = Document::new();
            if let Some(id) = &id {
                filter.insert(PRIMARY_KEY, id.as_str());
            }
            table.subscribe_with_snapshot(&filter)?
        } else {
            (table.subscribe()?, Vec::new())
        };
        debug!(collection = %collection, id = ?id, initial = snapshot.len(), "Opened change feed");

        let collection = collection.to_string();
        let link = link.clone();
        let mut closed = link.closed_signal();
        let inner = stream! {
            for doc in snapshot {
                let doc_id = doc.get_str(PRIMARY_KEY).unwrap_or_default().to_string();
                yield Change::<T>::from_event(ChangeEvent::initial(&collection, &doc_id, doc));
            }

            loop {
                if link.is_closed() {
                    yield Err(link.closed_error());
                    break;
                }

                let received = tokio::select! {
                    biased;
                    _ = closed.changed() => None,
                    received = receiver.recv() => Some(received),
                };

                match received {
                    None => {
                        debug!(collection = %collection, "Change feed ended by connection close");
                        yield Err(link.closed_error());
                        break;
                    }
                    Some(Ok(event)) => {
                        if id.as_deref().map_or(true, |wanted| wanted == event.id) {
                            yield Change::<T>::from_event(event);
                        }
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        warn!(collection = %collection, skipped, "Change feed fell behind");
                        yield Err(TidalError::Transient(format!(
                            "change feed on '{}' skipped {} notifications",
                            collection, skipped
                        )));
                    }
                    Some(Err(RecvError::Closed)) => {
                        yield Err(TidalError::CollectionNotFound(collection.clone()));
                        break;
                    }
                }
            }
        };

        Ok(Self {
            inner: Box::pin(inner),
        })
    }
}

impl<T> Stream for ChangeFeed<T> {
    type Item = Result<Change<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for ChangeFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed").finish_non_exhaustive()
    }
}
