//! Stream id to hub lookup

use crate::error::StreamError;
use crate::stream::hub::HubHandle;
use crate::transport::ConnectionHandle;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread-safe map of stream ids to their hubs
#[derive(Debug, Default)]
pub struct StreamRegistry {
    hubs: RwLock<HashMap<String, HubHandle>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, hub: HubHandle) -> Result<(), StreamError> {
        let id = id.into();
        let mut hubs = self.hubs.write();
        if hubs.contains_key(&id) {
            return Err(StreamError::AlreadyExists(id));
        }
        hubs.insert(id, hub);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<HubHandle> {
        self.hubs.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<HubHandle> {
        self.hubs.write().remove(id)
    }

    /// True if `id` names a hub that is still running
    pub fn is_live(&self, id: &str) -> bool {
        self.hubs
            .read()
            .get(id)
            .map(|hub| !hub.is_closed())
            .unwrap_or(false)
    }

    /// Attach a connection to the hub serving `id`
    pub async fn register(&self, id: &str, connection: ConnectionHandle) -> Result<(), StreamError> {
        let hub = self
            .get(id)
            .ok_or_else(|| StreamError::NotFound(id.to_string()))?;
        hub.register(connection).await
    }

    /// Registered stream ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.hubs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.hubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.read().is_empty()
    }

    /// Drop every hub handle, returning how many were held
    pub fn clear(&self) -> usize {
        let mut hubs = self.hubs.write();
        let count = hubs.len();
        hubs.clear();
        count
    }
}
