//! Tenant Connection Pool
//!
//! One connection per tenant, capped at a configured size. Requesting
//! a connection for a new tenant when the pool is full evicts the
//! least recently used entry and stops its connection. A pool service
//! instance is created explicitly and handed to whoever needs it;
//! there is no process-wide singleton.

use std::collections::HashMap;
use std::sync::Arc;

use crate::application::ports::Connector;
use crate::domain::tenant::TenantKey;
use crate::infrastructure::deriv::connection::{
    ConnectError, ConnectionLifecycle, ConnectionSettings, ConnectionState,
};

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum simultaneous connections.
    pub max_connections: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { max_connections: 8 }
    }
}

struct PoolEntry {
    lifecycle: Arc<ConnectionLifecycle>,
    last_used: u64,
}

struct PoolInner {
    entries: HashMap<TenantKey, PoolEntry>,
    // Logical clock for LRU ordering; bumped on every touch.
    clock: u64,
}

/// LRU-bounded pool of per-tenant connections.
pub struct PoolService {
    settings: PoolSettings,
    connection_settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    inner: tokio::sync::Mutex<PoolInner>,
}

impl PoolService {
    /// Create an empty pool. Connections are opened lazily by
    /// [`get_or_create`](Self::get_or_create).
    #[must_use]
    pub fn new(
        settings: PoolSettings,
        connection_settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            settings,
            connection_settings,
            connector,
            inner: tokio::sync::Mutex::new(PoolInner {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Number of pooled connections.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Whether `tenant` currently has a pooled connection.
    pub async fn contains(&self, tenant: &TenantKey) -> bool {
        self.inner.lock().await.entries.contains_key(tenant)
    }

    /// Fetch the tenant's connection, creating and connecting one if
    /// absent. A full pool evicts and stops its least recently used
    /// entry first. A stopped pooled connection is replaced; one whose
    /// supervisor gave up is reconnected before being returned.
    ///
    /// # Errors
    ///
    /// Propagates the connect failure; no entry is retained for a
    /// tenant whose credential was rejected.
    pub async fn get_or_create(
        &self,
        tenant: &TenantKey,
    ) -> Result<Arc<ConnectionLifecycle>, ConnectError> {
        let (lifecycle, evicted) = {
            let mut inner = self.inner.lock().await;
            inner.clock += 1;
            let now = inner.clock;

            let mut hit = None;
            if let Some(entry) = inner.entries.get_mut(tenant) {
                if entry.lifecycle.state() == ConnectionState::Closed {
                    inner.entries.remove(tenant);
                } else {
                    entry.last_used = now;
                    hit = Some(Arc::clone(&entry.lifecycle));
                }
            }
            if let Some(lifecycle) = hit {
                (lifecycle, None)
            } else {
                let mut evicted = None;
                if inner.entries.len() >= self.settings.max_connections {
                    if let Some(victim) = inner
                        .entries
                        .iter()
                        .min_by_key(|(_, e)| e.last_used)
                        .map(|(k, _)| k.clone())
                    {
                        evicted = inner.entries.remove(&victim).map(|e| (victim, e.lifecycle));
                    }
                }

                let lifecycle = ConnectionLifecycle::new(
                    tenant.clone(),
                    self.connection_settings.clone(),
                    Arc::clone(&self.connector),
                );
                inner.entries.insert(
                    tenant.clone(),
                    PoolEntry {
                        lifecycle: Arc::clone(&lifecycle),
                        last_used: now,
                    },
                );
                (lifecycle, evicted)
            }
        };

        // Stop the evicted connection and connect the new one outside
        // the pool lock so slow handshakes never block other tenants.
        if let Some((victim, old)) = evicted {
            tracing::info!(tenant = %victim, "evicting least recently used connection");
            old.stop();
        }

        if let Err(e) = lifecycle.connect().await {
            self.inner.lock().await.entries.remove(tenant);
            lifecycle.stop();
            return Err(e);
        }
        Ok(lifecycle)
    }

    /// Remove and stop the tenant's connection, if pooled.
    pub async fn release(&self, tenant: &TenantKey) {
        let removed = self.inner.lock().await.entries.remove(tenant);
        if let Some(entry) = removed {
            entry.lifecycle.stop();
            tracing::info!(tenant = %tenant, "released pooled connection");
        }
    }

    /// Stop every pooled connection and empty the pool.
    pub async fn shutdown(&self) {
        let entries: Vec<PoolEntry> = {
            let mut inner = self.inner.lock().await;
            inner.entries.drain().map(|(_, e)| e).collect()
        };
        let count = entries.len();
        for entry in entries {
            entry.lifecycle.stop();
        }
        tracing::info!(connections = count, "pool shut down");
    }
}
