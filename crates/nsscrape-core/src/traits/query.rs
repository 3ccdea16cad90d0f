// # Name Server Query Trait
//
// Defines the interface for looking up the authoritative NS records that
// currently exist under a root domain.
//
// ## Implementations
//
// - Cloudflare: `nsscrape-query-cloudflare` crate
// - Future: Route53, Cloud DNS, Azure DNS, etc.
//
// ## Usage
//
// ```rust,ignore
// use nsscrape_core::NameServerQuery;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let query = /* NameServerQuery implementation */;
//
//     let observed = query.get("example.com").await?;
//     for (subdomain, values) in &observed {
//         println!("{subdomain}: {values:?}");
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

/// A set of name-server target values
///
/// Ordered so comparisons are set equality and debug output is stable.
pub type NameServerSet = BTreeSet<String>;

/// Observed NS records of a root domain, keyed by fully-qualified subdomain
pub type NameServers = HashMap<String, NameServerSet>;

/// Trait for name-server query implementations
///
/// A query is a pure lookup: given a root domain, return every subdomain
/// under it that has NS records, together with the record values.
///
/// # Thread Safety
///
/// The scraper calls `get` for different root domains concurrently, so
/// implementations must be safe to share across tasks.
///
/// # Responsibilities
///
/// ## Allowed
/// - ✅ Perform API calls or DNS traffic against the backend
/// - ✅ Normalize record values (case, trailing dots)
///
/// ## Forbidden
/// - ❌ Retry or back off (owned by `NameServerScraper`)
/// - ❌ Cache results between calls
/// - ❌ Touch the tracked-domain state
/// - ❌ Spawn background tasks
#[async_trait]
pub trait NameServerQuery: Send + Sync {
    /// Get the NS records under a root domain
    ///
    /// # Parameters
    ///
    /// - `root_domain`: The root domain to list (e.g., "example.com")
    ///
    /// # Returns
    ///
    /// - `Ok(NameServers)`: Observed records; an empty map means nothing matched
    /// - `Err(Error)`: The lookup failed and should be retried later
    async fn get(&self, root_domain: &str) -> Result<NameServers, crate::Error>;

    /// Get the backend name (for logging/debugging)
    fn backend_name(&self) -> &'static str {
        "custom"
    }
}

/// Helper trait for constructing queries from configuration
pub trait NameServerQueryFactory: Send + Sync {
    /// Create a NameServerQuery instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Query backend configuration
    ///
    /// # Returns
    ///
    /// A boxed NameServerQuery trait object
    fn create(
        &self,
        config: &crate::config::QueryConfig,
    ) -> Result<Box<dyn NameServerQuery>, crate::Error>;
}
