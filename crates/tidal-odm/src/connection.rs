//! Connection handles with bounded in-flight operations

use crate::config::{ConnectOptions, PoolConfig, ResolvedOptions};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tidal_common::{Result, TidalError};
use tidal_store::{Database, Directory, Server, Table};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Connection to one database on one server
///
/// Handed out as `Arc<Connection>` by the [`Registry`](crate::Registry).
/// Every operation takes one of `PoolConfig::max_in_flight` slots for its
/// duration; cursors and change feeds keep their own clone of the link so
/// they can outlive the borrow they were created from.
pub struct Connection {
    options: ConnectOptions,
    resolved: ResolvedOptions,
    pool: PoolConfig,
    link: Link,
    opened_at: DateTime<Utc>,
}

impl Connection {
    /// Open a connection to the server addressed by `options`
    pub(crate) async fn open(
        directory: &Directory,
        options: ConnectOptions,
        pool: &PoolConfig,
    ) -> Result<Self> {
        if pool.max_in_flight == 0 {
            return Err(TidalError::Validation(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        let resolved = options.resolve();
        let server = directory.resolve(&resolved.host, resolved.port);
        server.authenticate(&resolved.user, &resolved.password)?;
        server.ensure_database(&resolved.db)?;

        info!(
            address = %server.address(),
            db = %resolved.db,
            user = %resolved.user,
            app_name = ?pool.app_name,
            "Connection opened"
        );

        let link = Link {
            address: server.address().to_string(),
            server,
            db: resolved.db.clone(),
            permits: Arc::new(Semaphore::new(pool.max_in_flight)),
            closed: Arc::new(watch::channel(false).0),
            timeout: resolved.timeout,
        };

        Ok(Self {
            options,
            resolved,
            pool: pool.clone(),
            link,
            opened_at: Utc::now(),
        })
    }

    /// The parameters this handle was requested with
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// The parameters with defaults applied
    pub fn resolved(&self) -> &ResolvedOptions {
        &self.resolved
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    /// `host:port` of the server
    pub fn address(&self) -> &str {
        &self.link.address
    }

    pub fn database_name(&self) -> &str {
        &self.link.db
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Operation slots not currently in use
    pub fn available_slots(&self) -> usize {
        self.link.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Close the handle; later operations fail with a connection error
    pub fn close(&self) {
        if !self.link.closed.send_replace(true) {
            self.link.permits.close();
            info!(address = %self.link.address, db = %self.link.db, "Connection closed");
        }
    }

    /// Check that the server and database are reachable
    pub async fn ping(&self) -> Result<bool> {
        let _permit = self.link.acquire().await?;
        self.link.database()?;
        Ok(true)
    }

    /// List the collections in this connection's database
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let _permit = self.link.acquire().await?;
        Ok(self.link.database()?.table_list())
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.link.address)
            .field("db", &self.link.db)
            .field("available_slots", &self.available_slots())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Shared state an operation needs to reach the server
#[derive(Clone)]
pub(crate) struct Link {
    server: Arc<Server>,
    address: String,
    db: String,
    permits: Arc<Semaphore>,
    /// Flips to `true` once; change feeds wait on it
    closed: Arc<watch::Sender<bool>>,
    timeout: Duration,
}

impl Link {
    /// Take an operation slot, waiting at most the connection timeout
    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        match tokio::time::timeout(self.timeout, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                debug!(address = %self.address, timeout = ?self.timeout, "Slot acquisition timed out");
                Err(TidalError::Timeout(format!(
                    "no free operation slot on {} within {:?}",
                    self.address, self.timeout
                )))
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that observes the handle being closed
    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub(crate) fn database(&self) -> Result<Arc<Database>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.server.database(&self.db)
    }

    /// Existing table; `CollectionNotFound` if it was never created or was dropped
    pub(crate) fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.database()?.table(name)
    }

    /// Table for a write, created on first use
    pub(crate) fn ensure_table(&self, name: &str) -> Result<Arc<Table>> {
        self.database()?.ensure_table(name)
    }

    pub(crate) fn closed_error(&self) -> TidalError {
        TidalError::Connection(format!("connection to {} is closed", self.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_default(directory: &Directory, pool: PoolConfig) -> Connection {
        Connection::open(directory, ConnectOptions::default(), &pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_database() {
        let directory = Directory::new();
        let conn = Connection::open(
            &directory,
            ConnectOptions::new().db("inventory"),
            &PoolConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(conn.database_name(), "inventory");
        assert_eq!(conn.address(), "localhost:28015");
        assert!(conn.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_open_rejects_bad_credentials() {
        let directory = Directory::new();
        let result = Connection::open(
            &directory,
            ConnectOptions::new().password("wrong"),
            &PoolConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(TidalError::Connection(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_zero_slots() {
        let directory = Directory::new();
        let pool = PoolConfig {
            max_in_flight: 0,
            ..PoolConfig::default()
        };
        let result = Connection::open(&directory, ConnectOptions::default(), &pool).await;
        assert!(matches!(result, Err(TidalError::Validation(_))));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_operations() {
        let directory = Directory::new();
        let conn = open_default(&directory, PoolConfig::default()).await;

        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(conn.ping().await, Err(TidalError::Connection(_))));
        assert!(matches!(
            conn.list_collection_names().await,
            Err(TidalError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_slot_acquisition_times_out() {
        let directory = Directory::new();
        let pool = PoolConfig {
            max_in_flight: 1,
            ..PoolConfig::default()
        };
        let conn = Connection::open(
            &directory,
            ConnectOptions::new().timeout(Duration::from_millis(50)),
            &pool,
        )
        .await
        .unwrap();

        let held = conn.link().acquire().await.unwrap();
        assert_eq!(conn.available_slots(), 0);
        assert!(matches!(conn.ping().await, Err(TidalError::Timeout(_))));

        drop(held);
        assert!(conn.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_collection_names() {
        let directory = Directory::new();
        let conn = open_default(&directory, PoolConfig::default()).await;

        conn.link().ensure_table("beta").unwrap();
        conn.link().ensure_table("alpha").unwrap();
        assert_eq!(
            conn.list_collection_names().await.unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }
}
