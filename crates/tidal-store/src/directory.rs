//! Address-keyed directory of in-process servers
//!
//! Resolving the same `host:port` twice yields the same server, so every
//! connection to that address sees the same data.

use crate::server::{Server, ServerConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Directory of running servers
#[derive(Default)]
pub struct Directory {
    servers: RwLock<HashMap<String, Arc<Server>>>,
    config: ServerConfig,
}

impl Directory {
    /// Create an empty directory whose servers use the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty directory whose servers use `config`
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Format a server address; host names are case-insensitive
    pub fn address(host: &str, port: u16) -> String {
        format!("{}:{}", host.to_ascii_lowercase(), port)
    }

    /// Return the server at `host:port`, starting it on first use
    pub fn resolve(&self, host: &str, port: u16) -> Arc<Server> {
        let address = Self::address(host, port);
        if let Some(server) = self.servers.read().get(&address) {
            return Arc::clone(server);
        }
        let mut servers = self.servers.write();
        let server = servers
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Server::new(address, self.config.clone())));
        Arc::clone(server)
    }

    /// Number of running servers
    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }
}
