//! Object-document mapper for tidal
//!
//! Typed models persisted through shared connection handles.
//!
//! # Features
//! - One shared handle per distinct set of connection parameters
//! - Save, load, bulk add, lookup, count and drop on serde models
//! - Field-equality filters and lazy batched cursors
//! - Per-document and per-collection change feeds
//!
//! # Example
//!
//! ```ignore
//! use tidal_odm::{ConnectOptions, Model, Registry};
//!
//! let registry = Registry::new();
//! let conn = registry.connect(ConnectOptions::default()).await?;
//!
//! let mut note = Note { id: None, field: "alpha".into() };
//! note.save(&conn).await?;
//! assert!(Note::exists(&conn, note.id().unwrap()).await?);
//! ```

pub mod changes;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod model;
pub mod query;
pub mod registry;
pub mod validation;

pub use changes::{Change, ChangeFeed, ChangeOptions};
pub use config::{ConnectOptions, PoolConfig, ResolvedOptions};
pub use connection::Connection;
pub use cursor::Cursor;
pub use model::{Model, Records, WriteOutcome};
pub use query::{Filter, Query};
pub use registry::{close, connect, Registry};
pub use tidal_common::{Result, TidalError};
pub use tidal_store::{ChangeKind, Directory, ServerConfig};
pub use validation::{validate_document, ValidatedCollectionName, ValidatedFieldName};
