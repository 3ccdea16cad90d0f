// # nsscrape-core
//
// Core library for the name-server scraper.
//
// ## Architecture Overview
//
// This library tracks the authoritative NS record set of delegated
// subdomains and tells the owning controller when it drifts:
// - **NameServerQuery**: Trait for fetching the NS records under a root domain
// - **ChangeNotifier**: Sink receiving the owner key of every drifted subdomain
// - **TrackedDomains**: Lock-guarded `root domain -> subdomain -> state` store
// - **NameServerScraper**: Registration API plus the scrape-diff-notify loop
// - **QueryRegistry**: Plugin-based registry for query backends
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Query backends never schedule or retry
// 2. **Per-Root Scheduling**: A failing root domain never delays the others
// 3. **Plugin-Based**: Query backends are registered dynamically
// 4. **Library-First**: The daemon is a thin wrapper around this crate
// 5. **Registration Only**: The scrape loop never invents tracked subdomains

pub mod traits;
pub mod engine;
pub mod registry;
pub mod config;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{
    ChangeNotifier, ChangeStream, ChannelNotifier, NameServerQuery, NameServerSet, NameServers,
    OwnerKey, notification_channel,
};
pub use engine::{NameServerScraper, RootDomainStatus, ScraperEvent};
pub use registry::QueryRegistry;
pub use config::{QueryConfig, ScraperConfig};
pub use error::{Error, Result};
pub use state::{EndpointState, TrackedDomains};
