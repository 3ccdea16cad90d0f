// # Tracked Domains Store
//
// The nested `root domain -> subdomain -> endpoint state` map shared by the
// registration API and the scrape loop.
//
// ## Invariants
//
// - Every configured root domain has an entry for the lifetime of the store
// - A subdomain entry exists only if it was added through `add_endpoint`
// - The scrape loop updates entries in place and never creates or deletes them
//
// ## Locking
//
// One mutex guards the whole map. Each public operation holds it across its
// complete lookup-and-mutate sequence and never across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::traits::{NameServerSet, NameServers, OwnerKey};

/// Last-known state of a tracked subdomain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointState {
    /// Object that requested tracking; the notification payload
    pub owner: OwnerKey,
    /// Last-known NS values
    pub ns_values: NameServerSet,
}

impl EndpointState {
    /// Create a new endpoint state
    pub fn new(owner: OwnerKey, ns_values: NameServerSet) -> Self {
        Self { owner, ns_values }
    }
}

/// A tracked subdomain whose NS values changed during a scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftedEndpoint {
    /// The subdomain that changed
    pub subdomain: String,
    /// Its owner
    pub owner: OwnerKey,
}

type SubdomainMap = HashMap<String, EndpointState>;

/// Lock-guarded map of tracked endpoints, keyed by root domain
///
/// # Example
///
/// ```rust
/// use nsscrape_core::{OwnerKey, TrackedDomains};
///
/// let store = TrackedDomains::new(["domain.com"]);
/// store.add_endpoint(
///     OwnerKey::new("ns", "name"),
///     "test.domain.com",
///     ["ns1.example.net".to_string()].into(),
/// );
///
/// let (root, values) = store.get_endpoint("test.domain.com");
/// assert_eq!(root.as_deref(), Some("domain.com"));
/// assert_eq!(values.len(), 1);
///
/// // Covered by a root domain but not tracked
/// let (root, values) = store.get_endpoint("other.domain.com");
/// assert_eq!(root.as_deref(), Some("domain.com"));
/// assert!(values.is_empty());
/// ```
#[derive(Debug)]
pub struct TrackedDomains {
    inner: Mutex<HashMap<String, SubdomainMap>>,
}

impl TrackedDomains {
    /// Create a store with one empty entry per root domain
    pub fn new<I, S>(root_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = root_domains
            .into_iter()
            .map(|root_domain| (root_domain.into(), SubdomainMap::new()))
            .collect();

        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SubdomainMap>> {
        // Mutations are single-step, so a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the configured root domain covering `subdomain`
    ///
    /// A root domain `r` covers `d` iff `d == r` or `d` ends with `".r"`.
    /// With nested root domains the longest match wins.
    pub fn root_domain_for(&self, subdomain: &str) -> Option<String> {
        let guard = self.lock();
        matching_root(&guard, subdomain).map(str::to_string)
    }

    /// Track `subdomain` on behalf of `owner`, replacing any previous state
    ///
    /// A subdomain under no configured root domain is silently ignored.
    /// This never triggers a notification.
    pub fn add_endpoint(&self, owner: OwnerKey, subdomain: &str, ns_values: NameServerSet) {
        let mut guard = self.lock();
        let Some(root_domain) = matching_root(&guard, subdomain).map(str::to_string) else {
            tracing::debug!(subdomain, "No root domain covers subdomain, ignoring registration");
            return;
        };

        if let Some(tracked) = guard.get_mut(&root_domain) {
            tracked.insert(subdomain.to_string(), EndpointState::new(owner, ns_values));
        }
    }

    /// Stop tracking `subdomain`; a no-op if it is not tracked
    pub fn remove_endpoint(&self, subdomain: &str) {
        let mut guard = self.lock();
        let Some(root_domain) = matching_root(&guard, subdomain).map(str::to_string) else {
            return;
        };

        if let Some(tracked) = guard.get_mut(&root_domain) {
            tracked.remove(subdomain);
        }
    }

    /// Look up the root domain covering `subdomain` and its tracked values
    ///
    /// # Returns
    ///
    /// - `(None, {})`: No configured root domain covers the name
    /// - `(Some(root), {})`: Covered, but not currently tracked
    /// - `(Some(root), values)`: Tracked with the given last-known values
    pub fn get_endpoint(&self, subdomain: &str) -> (Option<String>, NameServerSet) {
        let guard = self.lock();
        let Some(root_domain) = matching_root(&guard, subdomain) else {
            return (None, NameServerSet::new());
        };

        let values = guard
            .get(root_domain)
            .and_then(|tracked| tracked.get(subdomain))
            .map(|state| state.ns_values.clone())
            .unwrap_or_default();

        (Some(root_domain.to_string()), values)
    }

    /// Diff a scrape result against the tracked subdomains of `root_domain`
    ///
    /// Every tracked subdomain whose stored set differs from the observed
    /// one (a missing name counts as an empty set) is updated in place and
    /// reported. Observed names that are not tracked are ignored.
    pub fn apply_scrape(&self, root_domain: &str, observed: &NameServers) -> Vec<DriftedEndpoint> {
        let mut guard = self.lock();
        let Some(tracked) = guard.get_mut(root_domain) else {
            return Vec::new();
        };

        let absent = NameServerSet::new();
        let mut drifted = Vec::new();
        for (subdomain, state) in tracked.iter_mut() {
            let current = observed.get(subdomain).unwrap_or(&absent);
            if state.ns_values == *current {
                continue;
            }

            state.ns_values = current.clone();
            drifted.push(DriftedEndpoint {
                subdomain: subdomain.clone(),
                owner: state.owner.clone(),
            });
        }

        drifted
    }

    /// Configured root domains, sorted
    pub fn root_domains(&self) -> Vec<String> {
        let guard = self.lock();
        let mut root_domains: Vec<String> = guard.keys().cloned().collect();
        root_domains.sort();
        root_domains
    }

    /// Number of tracked subdomains across all root domains
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    /// Whether no subdomain is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole map, for diagnostics
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, EndpointState>> {
        let guard = self.lock();
        guard
            .iter()
            .map(|(root_domain, tracked)| {
                let tracked = tracked
                    .iter()
                    .map(|(subdomain, state)| (subdomain.clone(), state.clone()))
                    .collect();
                (root_domain.clone(), tracked)
            })
            .collect()
    }
}

fn is_member(subdomain: &str, root_domain: &str) -> bool {
    subdomain == root_domain
        || subdomain
            .strip_suffix(root_domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn matching_root<'a>(
    root_domains: &'a HashMap<String, SubdomainMap>,
    subdomain: &str,
) -> Option<&'a str> {
    root_domains
        .keys()
        .filter(|root_domain| is_member(subdomain, root_domain))
        .max_by_key(|root_domain| root_domain.len())
        .map(String::as_str)
}
