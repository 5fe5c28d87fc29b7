//! In-process document server for tidal
//!
//! # Features
//! - Named databases holding named tables of BSON documents
//! - String primary keys (`id`), generated on insert when absent
//! - Field-equality filters with dotted paths
//! - Per-table change feeds over `tokio::sync::broadcast`
//! - Address-keyed server directory so handles to the same host share data

pub mod change;
pub mod database;
pub mod directory;
pub mod filter;
pub mod server;
pub mod table;

pub use change::{ChangeEvent, ChangeKind};
pub use database::{validate_name, Database};
pub use directory::Directory;
pub use server::{Server, ServerConfig};
pub use table::{Table, WriteOutcome, PRIMARY_KEY};
pub use tidal_common::{Result, TidalError};
