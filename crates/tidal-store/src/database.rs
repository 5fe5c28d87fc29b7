//! Databases: named sets of tables

use crate::table::Table;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tidal_common::{Result, TidalError};
use tracing::info;

/// Maximum allowed length for database and table names
pub const MAX_NAME_LENGTH: usize = 120;

/// Check a database or table name
///
/// Names are non-empty, at most `MAX_NAME_LENGTH` characters, and use only
/// ASCII letters, digits, `_` and `-`.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TidalError::Validation(format!("{} name cannot be empty", kind)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(TidalError::Validation(format!(
            "{} name exceeds maximum length of {} characters: '{}'",
            kind, MAX_NAME_LENGTH, name
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(TidalError::Validation(format!(
            "{} name '{}' contains invalid character {:?}",
            kind, name, bad
        )));
    }
    Ok(())
}

/// A database on an in-process server
pub struct Database {
    name: String,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    change_buffer: usize,
}

impl Database {
    pub fn new(name: impl Into<String>, change_buffer: usize) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
            change_buffer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an existing table
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TidalError::CollectionNotFound(name.to_string()))
    }

    /// Create a table; fails with `Conflict` if it already exists
    pub fn table_create(&self, name: &str) -> Result<Arc<Table>> {
        validate_name("Table", name)?;
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(TidalError::Conflict(format!(
                "table '{}.{}' already exists",
                self.name, name
            )));
        }
        let table = Arc::new(Table::new(name, self.change_buffer));
        tables.insert(name.to_string(), Arc::clone(&table));
        info!(database = %self.name, table = %name, "created table");
        Ok(table)
    }

    /// Return the table, creating it on first use
    pub fn ensure_table(&self, name: &str) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.read().get(name) {
            return Ok(Arc::clone(table));
        }
        validate_name("Table", name)?;
        let mut tables = self.tables.write();
        let table = tables.entry(name.to_string()).or_insert_with(|| {
            info!(database = %self.name, table = %name, "created table");
            Arc::new(Table::new(name, self.change_buffer))
        });
        Ok(Arc::clone(table))
    }

    /// Drop a table and end its change feeds
    ///
    /// Idempotent: returns whether the table existed.
    pub fn table_drop(&self, name: &str) -> bool {
        let removed = self.tables.write().remove(name);
        match removed {
            Some(table) => {
                table.close_feeds();
                info!(database = %self.name, table = %name, "dropped table");
                true
            }
            None => false,
        }
    }

    /// Sorted table names
    pub fn table_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// End the change feeds of every table (used when the database is dropped)
    pub(crate) fn close_all_feeds(&self) {
        for table in self.tables.read().values() {
            table.close_feeds();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("tables", &self.table_list())
            .finish()
    }
}
