//! Plugin-based query registry
//!
//! The registry allows name-server query backends to be registered
//! dynamically at runtime, so the daemon selects a backend by name from
//! configuration instead of hardcoding one.
//!
//! ## Registration
//!
//! Backend crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In nsscrape-query-cloudflare
//! pub fn register(registry: &QueryRegistry) {
//!     registry.register_query("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::traits::{NameServerQuery, NameServerQueryFactory};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Query registry for plugin-based backend creation
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct QueryRegistry {
    queries: RwLock<HashMap<String, Box<dyn NameServerQueryFactory>>>,
}

impl QueryRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query factory
    ///
    /// # Parameters
    ///
    /// - `name`: Backend type name (e.g., "cloudflare")
    /// - `factory`: Factory object for creating query instances
    ///
    /// Registering a name twice replaces the earlier factory.
    pub fn register_query(&self, name: impl Into<String>, factory: Box<dyn NameServerQueryFactory>) {
        let name = name.into();
        let mut queries = self.queries.write().unwrap_or_else(PoisonError::into_inner);
        queries.insert(name, factory);
    }

    /// Create a query backend from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn NameServerQuery>)`: Created query instance
    /// - `Err(Error)`: If the backend type is not registered or creation fails
    pub fn create_query(&self, config: &QueryConfig) -> Result<Box<dyn NameServerQuery>> {
        let query_type = config.type_name();
        let queries = self.queries.read().unwrap_or_else(PoisonError::into_inner);

        let factory = queries
            .get(query_type)
            .ok_or_else(|| Error::config(format!("Unknown query type: {}", query_type)))?;

        factory.create(config)
    }

    /// List all registered backend types, sorted
    pub fn list_queries(&self) -> Vec<String> {
        let queries = self.queries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = queries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend type is registered
    pub fn has_query(&self, name: &str) -> bool {
        let queries = self.queries.read().unwrap_or_else(PoisonError::into_inner);
        queries.contains_key(name)
    }
}
