// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Registry of live client connections.
//
// Jobs remember only the `ConnectionId` of their origin. Before a result is
// written the notifier looks the id up here, so a client that disconnected
// while its job was printing is simply skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use tillprint_core::types::ConnectionId;

pub struct ClientRegistry<C> {
    clients: RwLock<HashMap<ConnectionId, Arc<C>>>,
    next_id: AtomicU64,
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<C> ClientRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id that has never been handed out before.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add(&self, id: ConnectionId, client: Arc<C>) {
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(id, client);
            debug!(connection = %id, total = clients.len(), "Client registered");
        }
    }

    /// Returns `true` if the id was registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        match self.clients.write() {
            Ok(mut clients) => {
                let removed = clients.remove(&id).is_some();
                if removed {
                    debug!(connection = %id, total = clients.len(), "Client deregistered");
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<C>> {
        self.clients.read().ok()?.get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Every registered client, for broadcast-style operations like shutdown.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<C>)> {
        self.clients
            .read()
            .map(|c| c.iter().map(|(id, client)| (*id, Arc::clone(client))).collect())
            .unwrap_or_default()
    }
}
