// # Tracked Domain State
//
// In-memory store of the endpoints the scraper watches. State is rebuilt
// from controller registrations on restart, so nothing here persists.

pub mod memory;

pub use memory::{DriftedEndpoint, EndpointState, TrackedDomains};
