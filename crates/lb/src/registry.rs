//! Live set of backend servers.
//!
//! Every mutation is applied under the registry's write lock: the server list,
//! the weight provider and the selector change together, so a concurrent
//! recompute never sees a provider that disagrees with the server list.

use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info};

use crate::error::{LbError, LbResult};
use crate::metrics::WeightProvider;
use crate::selector::Selector;
use crate::server::Server;
use crate::weights::WeightTable;

pub struct ServerRegistry {
    servers: RwLock<Vec<Server>>,
    provider: Option<Arc<dyn WeightProvider>>,
    selector: Arc<Selector>,
}

impl ServerRegistry {
    /// At most one weight provider is active; without one every server gets
    /// the same weight.
    pub fn new(selector: Arc<Selector>, provider: Option<Arc<dyn WeightProvider>>) -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            provider,
            selector,
        }
    }

    /// Adds `server` unless an equal one is registered. Returns whether the
    /// server was added.
    pub fn upsert(&self, server: Server) -> bool {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        if servers.contains(&server) {
            debug!("Server {} already registered", server);
            return false;
        }

        if let Some(provider) = &self.provider {
            provider.upsert_server(&server);
        }
        info!("Registered server {}", server);
        servers.push(server);

        self.install(&servers);
        true
    }

    /// Removes `server` and every piece of state kept for it.
    pub fn remove(&self, server: &Server) -> LbResult<()> {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        let idx = servers
            .iter()
            .position(|s| s == server)
            .ok_or_else(|| LbError::ServerNotFound(server.clone()))?;

        servers.remove(idx);
        if let Some(provider) = &self.provider {
            provider.remove_server(server);
        }
        info!("Removed server {}", server);

        self.install(&servers);
        Ok(())
    }

    /// Registered servers in registration order.
    pub fn list(&self) -> Vec<Server> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, server: &Server) -> bool {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(server)
    }

    pub fn len(&self) -> usize {
        self.servers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the weight table from the provider and installs it.
    pub fn recompute(&self) {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        self.install(&servers);
    }

    /// Weight table covering exactly the registered servers.
    pub fn weight_table(&self) -> WeightTable {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        self.build_table(&servers)
    }

    fn build_table(&self, servers: &[Server]) -> WeightTable {
        let mut table = WeightTable::uniform(servers);
        if let Some(provider) = &self.provider {
            for (server, weight) in provider.weights().iter() {
                if table.contains(server) {
                    table.insert(server.clone(), weight);
                }
            }
        }
        table
    }

    fn install(&self, servers: &[Server]) {
        if let Selector::RoundRobin(wrr) = self.selector.as_ref() {
            wrr.update(&self.build_table(servers));
        }
    }
}
