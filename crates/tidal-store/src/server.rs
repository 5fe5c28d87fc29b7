//! In-process document server

use crate::database::{validate_name, Database};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tidal_common::{Result, TidalError};
use tracing::info;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Change events buffered per table before slow subscribers lag (default: 1024)
    pub change_buffer: usize,
    /// Database created when the server starts (default: "test")
    pub default_database: String,
    /// Accepted user/password pairs (default: "admin" with an empty password)
    pub users: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert("admin".to_string(), String::new());
        Self {
            change_buffer: 1024,
            default_database: "test".to_string(),
            users,
        }
    }
}

/// A document server reachable at one address
pub struct Server {
    address: String,
    config: ServerConfig,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    started_at: DateTime<Utc>,
}

impl Server {
    /// Start a server with its default database
    pub fn new(address: impl Into<String>, config: ServerConfig) -> Self {
        let mut databases = HashMap::new();
        databases.insert(
            config.default_database.clone(),
            Arc::new(Database::new(
                config.default_database.clone(),
                config.change_buffer,
            )),
        );
        let address = address.into();
        info!(address = %address, "started document server");
        Self {
            address,
            config,
            databases: RwLock::new(databases),
            started_at: Utc::now(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Verify credentials
    pub fn authenticate(&self, user: &str, password: &str) -> Result<()> {
        match self.config.users.get(user) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(TidalError::Connection(format!(
                "authentication failed for user '{}' on {}",
                user, self.address
            ))),
        }
    }

    /// Look up an existing database
    pub fn database(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TidalError::DatabaseNotFound(name.to_string()))
    }

    /// Create a database; fails with `Conflict` if it already exists
    pub fn db_create(&self, name: &str) -> Result<Arc<Database>> {
        validate_name("Database", name)?;
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            return Err(TidalError::Conflict(format!(
                "database '{}' already exists",
                name
            )));
        }
        let db = Arc::new(Database::new(name, self.config.change_buffer));
        databases.insert(name.to_string(), Arc::clone(&db));
        info!(address = %self.address, database = %name, "created database");
        Ok(db)
    }

    /// Return the database, creating it on first use
    pub fn ensure_database(&self, name: &str) -> Result<Arc<Database>> {
        if let Ok(db) = self.database(name) {
            return Ok(db);
        }
        validate_name("Database", name)?;
        let mut databases = self.databases.write();
        let db = databases.entry(name.to_string()).or_insert_with(|| {
            info!(address = %self.address, database = %name, "created database");
            Arc::new(Database::new(name, self.config.change_buffer))
        });
        Ok(Arc::clone(db))
    }

    /// Drop a database with all of its tables; returns whether it existed
    pub fn db_drop(&self, name: &str) -> bool {
        let removed = self.databases.write().remove(name);
        match removed {
            Some(db) => {
                db.close_all_feeds();
                info!(address = %self.address, database = %name, "dropped database");
                true
            }
            None => false,
        }
    }

    /// Sorted database names
    pub fn db_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("databases", &self.db_list())
            .finish()
    }
}
