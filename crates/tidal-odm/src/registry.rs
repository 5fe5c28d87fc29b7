//! Connection handle registry
//!
//! A registry hands out one shared handle per distinct set of connection
//! parameters and remembers the most recently requested handle as its
//! default. Most code constructs a `Registry` and passes handles around;
//! `connect` / `close` at the crate root use a process-wide instance.

use crate::config::{ConnectOptions, PoolConfig};
use crate::connection::Connection;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tidal_common::{Result, TidalError};
use tidal_store::Directory;
use tracing::{debug, info, instrument};

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

#[derive(Default)]
struct RegistryState {
    handles: HashMap<ConnectOptions, Arc<Connection>>,
    /// Key of the handle returned by the most recent `connect`
    current: Option<ConnectOptions>,
}

/// Registry of shared connection handles
pub struct Registry {
    directory: Directory,
    pool: PoolConfig,
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create a registry with its own set of in-process servers
    pub fn new() -> Self {
        Self::with_directory(Directory::new(), PoolConfig::default())
    }

    /// Create a registry whose connections use `pool`
    pub fn with_pool_config(pool: PoolConfig) -> Self {
        Self::with_directory(Directory::new(), pool)
    }

    /// Create a registry over an existing server directory
    pub fn with_directory(directory: Directory, pool: PoolConfig) -> Self {
        Self {
            directory,
            pool,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Return the handle for `options`, opening it on first request
    ///
    /// Identical options yield the identical `Arc`; the handle becomes the
    /// registry's default.
    #[instrument(skip(self, options), fields(host = ?options.host, port = ?options.port, db = ?options.db))]
    pub async fn connect(&self, options: ConnectOptions) -> Result<Arc<Connection>> {
        if let Some(existing) = self.lookup(&options) {
            debug!("Reusing open connection");
            return Ok(existing);
        }

        let opened = Arc::new(Connection::open(&self.directory, options.clone(), &self.pool).await?);

        let mut state = self.state.lock();
        // A concurrent connect with the same options may have won the race
        let handle = match state.handles.get(&options) {
            Some(existing) if !existing.is_closed() => Arc::clone(existing),
            _ => {
                state.handles.insert(options.clone(), Arc::clone(&opened));
                opened
            }
        };
        state.current = Some(options);
        Ok(handle)
    }

    /// The default handle
    pub fn current(&self) -> Result<Arc<Connection>> {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .and_then(|key| state.handles.get(key))
            .filter(|conn| !conn.is_closed())
            .cloned()
            .ok_or_else(|| TidalError::Connection("No active connection".to_string()))
    }

    /// Close and forget the default handle
    pub fn close(&self) -> Result<()> {
        let closed = {
            let mut state = self.state.lock();
            let key = state
                .current
                .take()
                .ok_or_else(|| TidalError::Connection("No active connection to close".to_string()))?;
            state.handles.remove(&key)
        };

        match closed {
            Some(conn) if !conn.is_closed() => {
                conn.close();
                Ok(())
            }
            _ => Err(TidalError::Connection(
                "No active connection to close".to_string(),
            )),
        }
    }

    /// Close every handle; returns how many were open
    pub fn close_all(&self) -> usize {
        let handles: Vec<Arc<Connection>> = {
            let mut state = self.state.lock();
            state.current = None;
            state.handles.drain().map(|(_, conn)| conn).collect()
        };

        let mut count = 0;
        for conn in handles {
            if !conn.is_closed() {
                conn.close();
                count += 1;
            }
        }
        info!(closed = count, "Closed all connections");
        count
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().handles.is_empty()
    }

    fn lookup(&self, options: &ConnectOptions) -> Option<Arc<Connection>> {
        let mut state = self.state.lock();
        match state.handles.get(options) {
            Some(conn) if !conn.is_closed() => {
                let conn = Arc::clone(conn);
                state.current = Some(options.clone());
                Some(conn)
            }
            Some(_) => {
                // Closed directly through the handle
                state.handles.remove(options);
                None
            }
            None => None,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect through the process-wide registry
pub async fn connect(options: ConnectOptions) -> Result<Arc<Connection>> {
    Registry::global().connect(options).await
}

/// Close the process-wide registry's default handle
pub fn close() -> Result<()> {
    Registry::global().close()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_options_share_handle() {
        let registry = Registry::new();
        let a = registry.connect(ConnectOptions::new().db("app")).await.unwrap();
        let b = registry.connect(ConnectOptions::new().db("app")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_current_follows_latest_connect() {
        let registry = Registry::new();
        assert!(registry.current().is_err());

        let a = registry.connect(ConnectOptions::default()).await.unwrap();
        let b = registry.connect(ConnectOptions::new().db("other")).await.unwrap();
        assert!(Arc::ptr_eq(&registry.current().unwrap(), &b));

        let again = registry.connect(ConnectOptions::default()).await.unwrap();
        assert!(Arc::ptr_eq(&again, &a));
        assert!(Arc::ptr_eq(&registry.current().unwrap(), &a));
    }

    #[tokio::test]
    async fn test_close_releases_default_only() {
        let registry = Registry::new();
        let a = registry.connect(ConnectOptions::default()).await.unwrap();
        let b = registry.connect(ConnectOptions::new().db("other")).await.unwrap();

        registry.close().unwrap();
        assert!(b.is_closed());
        assert!(!a.is_closed());
        assert_eq!(registry.len(), 1);

        // Nothing is default any more
        assert!(registry.close().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_after_close_gives_fresh_handle() {
        let registry = Registry::new();
        let first = registry.connect(ConnectOptions::default()).await.unwrap();
        registry.close().unwrap();

        let second = registry.connect(ConnectOptions::default()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_handle_closed_directly_is_replaced() {
        let registry = Registry::new();
        let first = registry.connect(ConnectOptions::default()).await.unwrap();
        first.close();

        let second = registry.connect(ConnectOptions::default()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = Registry::new();
        let a = registry.connect(ConnectOptions::default()).await.unwrap();
        let b = registry.connect(ConnectOptions::new().port(28016)).await.unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(a.is_closed() && b.is_closed());
        assert!(registry.is_empty());
        assert!(registry.current().is_err());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_registered() {
        let registry = Registry::new();
        let result = registry
            .connect(ConnectOptions::new().user("nobody"))
            .await;
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
