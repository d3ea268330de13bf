//! # Resource Registry
//!
//! Named facades, one per store node, plus key routing across them.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kvrelay_pool::Transport;
use parking_lot::RwLock;
use tracing::info;

use crate::error::{RelayError, Result};
use crate::facade::ResourceFacade;

/// Picks the node responsible for a key.
pub trait KeyRouter: Send + Sync {
    /// Route `key` to one of `nodes`, or `None` when there are none.
    fn route<'a>(&self, key: &str, nodes: &'a [String]) -> Option<&'a str>;
}

/// Stable hash of the key modulo the node count.
///
/// A `{tag}` inside the key is hashed instead of the whole key, so related
/// keys can be pinned to one node.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashRouter;

impl HashRouter {
    fn hash_slot(key: &str) -> &str {
        if let Some(open) = key.find('{') {
            if let Some(len) = key[open + 1..].find('}') {
                if len > 0 {
                    return &key[open + 1..open + 1 + len];
                }
            }
        }
        key
    }
}

impl KeyRouter for HashRouter {
    fn route<'a>(&self, key: &str, nodes: &'a [String]) -> Option<&'a str> {
        if nodes.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        Self::hash_slot(key).hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % nodes.len() as u64).unwrap_or(0);
        nodes.get(index).map(String::as_str)
    }
}

/// Facades keyed by name.
pub struct ResourceRegistry<T: Transport> {
    resources: RwLock<BTreeMap<String, Arc<ResourceFacade<T>>>>,
    router: Box<dyn KeyRouter>,
}

impl<T: Transport> Default for ResourceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ResourceRegistry<T> {
    pub fn new() -> Self {
        Self::with_router(HashRouter)
    }

    pub fn with_router(router: impl KeyRouter + 'static) -> Self {
        Self {
            resources: RwLock::new(BTreeMap::new()),
            router: Box::new(router),
        }
    }

    /// Register `facade` under its own name.
    ///
    /// # Errors
    ///
    /// [`RelayError::DuplicateResource`] if the name is taken.
    pub fn register(&self, facade: ResourceFacade<T>) -> Result<Arc<ResourceFacade<T>>> {
        let name = facade.name().to_string();
        let mut resources = self.resources.write();
        if resources.contains_key(&name) {
            return Err(RelayError::DuplicateResource(name));
        }
        let facade = Arc::new(facade);
        resources.insert(name.clone(), Arc::clone(&facade));
        drop(resources);

        info!(relay = %name, "Resource registered");
        Ok(facade)
    }

    /// # Errors
    ///
    /// [`RelayError::UnknownResource`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<ResourceFacade<T>>> {
        self.resources
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownResource(name.to_string()))
    }

    /// Facade responsible for `key`.
    ///
    /// # Errors
    ///
    /// [`RelayError::UnknownResource`] if the registry is empty.
    pub fn route(&self, key: &str) -> Result<Arc<ResourceFacade<T>>> {
        let resources = self.resources.read();
        let nodes: Vec<String> = resources.keys().cloned().collect();
        self.router
            .route(key, &nodes)
            .and_then(|name| resources.get(name))
            .cloned()
            .ok_or_else(|| RelayError::UnknownResource(key.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.resources.read().keys().cloned().collect()
    }

    /// Unregister `name` without shutting it down.
    pub fn remove(&self, name: &str) -> Option<Arc<ResourceFacade<T>>> {
        self.resources.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Unregister and shut down every facade.
    pub async fn shutdown_all(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.resources.write())
            .into_values()
            .collect();
        let count = drained.len();
        for facade in drained {
            facade.shutdown().await;
        }
        info!(count, "All resources shut down");
    }
}
