//! Name-server scrape engine
//!
//! The NameServerScraper is responsible for:
//! - Exposing the registration API used by the owning controller
//! - Periodically querying the NS records of every root domain
//! - Diffing the results against the tracked endpoints
//! - Notifying owners whose endpoints drifted
//!
//! ## Architecture
//!
//! ```text
//!   controller ── add/remove/get ──┐
//!                                  ▼
//!                         ┌────────────────┐
//!                         │ TrackedDomains │
//!                         └────────────────┘
//!                                  ▲
//!                          diff + update
//!                                  │
//! ┌─────────────────┐     ┌─────────────────┐     ┌────────────────┐
//! │ NameServerQuery │ ◀── │ NameServerScraper│ ──▶ │ ChangeNotifier │
//! │ (per root)      │     │ (schedule)       │     │ (owner keys)   │
//! └─────────────────┘     └─────────────────┘     └────────────────┘
//! ```
//!
//! ## Scheduling
//!
//! Every root domain is scraped immediately on start. Afterwards each root
//! domain is scraped again one scrape period after its last attempt, or
//! one error backoff after it if that attempt failed. Root domains are
//! scraped on their own tasks, so a slow or failing one never delays the
//! others. Failures are retried forever.

use crate::config::ScraperConfig;
use crate::error::{Error, Result};
use crate::state::{EndpointState, TrackedDomains};
use crate::traits::{ChangeNotifier, NameServerQuery, NameServerSet, OwnerKey};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events emitted by the NameServerScraper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScraperEvent {
    /// Scrape loop started
    Started {
        root_domains: usize,
    },

    /// A root domain was scraped
    ScrapeSucceeded {
        root_domain: String,
        changed: usize,
    },

    /// Querying a root domain failed; it will be retried after the backoff
    ScrapeFailed {
        root_domain: String,
        error: String,
        consecutive_failures: u32,
    },

    /// Scrape loop stopped
    Stopped {
        reason: String,
    },
}

/// Scrape bookkeeping for one root domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDomainStatus {
    /// When the last scrape attempt finished
    pub last_attempt: Option<DateTime<Utc>>,
    /// When the last successful scrape finished
    pub last_success: Option<DateTime<Utc>>,
    /// Failed attempts since the last success
    pub consecutive_failures: u32,
    /// Delay before the next attempt
    pub next_interval: Duration,
}

/// Tracks delegated subdomains and notifies their owners on NS drift
///
/// The scraper is cheap to clone; clones share the same state, so the
/// controller can keep one handle for registrations while another runs
/// [`NameServerScraper::start`].
///
/// ## Lifecycle
///
/// 1. Create with [`NameServerScraper::new()`]
/// 2. Register endpoints with [`NameServerScraper::add_endpoint()`]
/// 3. Run [`NameServerScraper::start()`] until the token is cancelled
#[derive(Clone)]
pub struct NameServerScraper {
    inner: Arc<Inner>,
}

struct Inner {
    /// Query backend
    query: Arc<dyn NameServerQuery>,

    /// Sink for owner keys of drifted endpoints
    notifier: Arc<dyn ChangeNotifier>,

    /// Tracked endpoints
    domains: TrackedDomains,

    /// Steady-state interval between scrapes of a root domain
    scrape_period: Duration,

    /// Retry interval after a failed scrape
    error_backoff: Duration,

    /// Per root domain scrape bookkeeping
    statuses: Mutex<HashMap<String, RootDomainStatus>>,

    /// Set while `start` is running
    running: AtomicBool,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ScraperEvent>,
}

impl std::fmt::Debug for NameServerScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameServerScraper")
            .field("backend", &self.inner.query.backend_name())
            .field("root_domains", &self.inner.domains.root_domains())
            .field("scrape_period", &self.inner.scrape_period)
            .field("error_backoff", &self.inner.error_backoff)
            .finish()
    }
}

impl NameServerScraper {
    /// Create a new scraper
    ///
    /// # Parameters
    ///
    /// - `query`: Query backend
    /// - `notifier`: Sink for owner keys of drifted endpoints
    /// - `config`: Scraper configuration
    ///
    /// # Returns
    ///
    /// A tuple of (scraper, event_receiver) where event_receiver yields monitoring events
    pub fn new(
        query: Box<dyn NameServerQuery>,
        notifier: Box<dyn ChangeNotifier>,
        config: ScraperConfig,
    ) -> Result<(Self, mpsc::Receiver<ScraperEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let statuses = config
            .root_domains
            .iter()
            .map(|root_domain| (root_domain.clone(), RootDomainStatus::default()))
            .collect();

        let inner = Inner {
            query: Arc::from(query),
            notifier: Arc::from(notifier),
            domains: TrackedDomains::new(config.root_domains.iter().cloned()),
            scrape_period: config.scrape_period(),
            error_backoff: config.error_backoff(),
            statuses: Mutex::new(statuses),
            running: AtomicBool::new(false),
            event_tx: tx,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    /// Track `subdomain` for `owner` with the given last-known values
    ///
    /// Ignored when no configured root domain covers `subdomain`.
    pub fn add_endpoint(&self, owner: OwnerKey, subdomain: &str, ns_values: NameServerSet) {
        self.inner.domains.add_endpoint(owner, subdomain, ns_values);
    }

    /// Stop tracking `subdomain`
    pub fn remove_endpoint(&self, subdomain: &str) {
        self.inner.domains.remove_endpoint(subdomain);
    }

    /// Root domain covering `subdomain` (if any) and its tracked values
    pub fn get_endpoint(&self, subdomain: &str) -> (Option<String>, NameServerSet) {
        self.inner.domains.get_endpoint(subdomain)
    }

    /// Copy of all tracked endpoints, keyed by root domain
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, EndpointState>> {
        self.inner.domains.snapshot()
    }

    /// Scrape bookkeeping for one root domain
    pub fn status(&self, root_domain: &str) -> Option<RootDomainStatus> {
        self.inner.lock_statuses().get(root_domain).cloned()
    }

    /// Scrape bookkeeping for all root domains
    pub fn statuses(&self) -> BTreeMap<String, RootDomainStatus> {
        self.inner
            .lock_statuses()
            .iter()
            .map(|(root_domain, status)| (root_domain.clone(), status.clone()))
            .collect()
    }

    /// Run the scrape loop until `shutdown` is cancelled
    ///
    /// Scrapes already in flight when the token fires are allowed to finish
    /// (and their changes applied and notified) before returning.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error::AlreadyRunning)`: Another `start` on this scraper is active
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let _running = RunningGuard(&self.inner.running);

        let root_domains = self.inner.domains.root_domains();
        info!(
            backend = self.inner.query.backend_name(),
            root_domains = ?root_domains,
            "Starting name server scraper"
        );
        self.inner.emit_event(ScraperEvent::Started {
            root_domains: root_domains.len(),
        });

        // Next scrape time of every root domain not currently in flight
        let now = Instant::now();
        let mut schedule: HashMap<String, Instant> = root_domains
            .into_iter()
            .map(|root_domain| (root_domain, now))
            .collect();

        // Dropping `start` drops the set, which aborts every scrape in it
        let mut in_flight = JoinSet::new();
        let mut attempts: HashMap<Id, InFlight> = HashMap::new();

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown signal received");
                break;
            }

            let now = Instant::now();
            let due: Vec<String> = schedule
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(root_domain, _)| root_domain.clone())
                .collect();
            for root_domain in due {
                schedule.remove(&root_domain);

                let inner = Arc::clone(&self.inner);
                let task_root_domain = root_domain.clone();
                let handle =
                    in_flight.spawn(async move { inner.scrape(&task_root_domain).await });
                attempts.insert(
                    handle.id(),
                    InFlight {
                        root_domain,
                        started: now,
                    },
                );
            }

            let next_deadline = schedule.values().min().copied();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    if let Some((root_domain, next)) = self.inner.finish_attempt(&mut attempts, joined) {
                        schedule.insert(root_domain, next);
                    }
                }

                _ = sleep_until(next_deadline) => {}
            }
        }

        if !in_flight.is_empty() {
            debug!("Waiting for {} in-flight scrape(s)", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next_with_id().await {
            self.inner.finish_attempt(&mut attempts, joined);
        }

        self.inner.emit_event(ScraperEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("Name server scraper stopped");

        Ok(())
    }
}

/// A scrape running on the scraper's `JoinSet`
struct InFlight {
    root_domain: String,
    started: Instant,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    /// Perform one scrape pass over `root_domain`
    ///
    /// # Returns
    ///
    /// The number of tracked endpoints that changed
    async fn scrape(&self, root_domain: &str) -> Result<usize> {
        debug!(root_domain, "Scraping name servers");

        let observed = match self.query.get(root_domain).await {
            Ok(observed) => observed,
            Err(e) => {
                let err = Error::query(format!("{root_domain}: {e}"));
                self.record_failure(root_domain, &e);
                return Err(err);
            }
        };

        let drifted = self.domains.apply_scrape(root_domain, &observed);

        // The state lock is released; notify outside of it
        for endpoint in &drifted {
            info!(
                root_domain,
                subdomain = %endpoint.subdomain,
                owner = %endpoint.owner,
                "Name servers changed"
            );
            self.notifier.notify(endpoint.owner.clone());
        }

        self.record_success(root_domain, drifted.len());
        Ok(drifted.len())
    }

    /// Settle a finished scrape task and pick the root domain's next scrape time
    ///
    /// A panicked task counts as a failed attempt, so its root domain is
    /// retried after the error backoff. Intervals are measured from the
    /// start of the attempt.
    fn finish_attempt(
        &self,
        attempts: &mut HashMap<Id, InFlight>,
        joined: std::result::Result<(Id, Result<usize>), JoinError>,
    ) -> Option<(String, Instant)> {
        let (id, succeeded) = match joined {
            Ok((id, outcome)) => (id, outcome.is_ok()),
            Err(e) => {
                let id = e.id();
                if let Some(attempt) = attempts.get(&id) {
                    let err = Error::Other(format!("scrape task failed: {e}"));
                    self.record_failure(&attempt.root_domain, &err);
                } else {
                    error!("Scrape task failed: {}", e);
                }
                (id, false)
            }
        };

        let attempt = attempts.remove(&id)?;
        let interval = if succeeded {
            self.scrape_period
        } else {
            self.error_backoff
        };
        Some((attempt.root_domain, attempt.started + interval))
    }

    fn record_success(&self, root_domain: &str, changed: usize) {
        let now = Utc::now();
        {
            let mut statuses = self.lock_statuses();
            let status = statuses.entry(root_domain.to_string()).or_default();
            status.last_attempt = Some(now);
            status.last_success = Some(now);
            status.consecutive_failures = 0;
            status.next_interval = self.scrape_period;
        }

        debug!(root_domain, changed, "Scrape succeeded");
        self.emit_event(ScraperEvent::ScrapeSucceeded {
            root_domain: root_domain.to_string(),
            changed,
        });
    }

    fn record_failure(&self, root_domain: &str, err: &Error) {
        let consecutive_failures = {
            let mut statuses = self.lock_statuses();
            let status = statuses.entry(root_domain.to_string()).or_default();
            status.last_attempt = Some(Utc::now());
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.next_interval = self.error_backoff;
            status.consecutive_failures
        };

        if err.is_transient() {
            warn!(
                root_domain,
                consecutive_failures,
                retry_in = ?self.error_backoff,
                "Failed to query name servers: {}", err
            );
        } else {
            error!(
                root_domain,
                consecutive_failures,
                retry_in = ?self.error_backoff,
                "Failed to query name servers: {}", err
            );
        }

        self.emit_event(ScraperEvent::ScrapeFailed {
            root_domain: root_domain.to_string(),
            error: err.to_string(),
            consecutive_failures,
        });
    }

    fn lock_statuses(&self) -> std::sync::MutexGuard<'_, HashMap<String, RootDomainStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit a scraper event
    ///
    /// # Parameters
    ///
    /// - `event`: The event to emit
    fn emit_event(&self, event: ScraperEvent) {
        // Monitoring must never stall scraping; drop when the consumer lags
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send scraper event: {}", e);
        }
    }
}
