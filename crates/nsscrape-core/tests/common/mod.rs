//! Test doubles and common utilities for scraper contract tests
//!
//! This module provides minimal test doubles that verify scheduling and
//! notification behavior without talking to a real DNS backend.

#![allow(dead_code)]

use nsscrape_core::error::{Error, Result};
use nsscrape_core::{
    NameServerQuery, NameServerScraper, NameServerSet, NameServers, OwnerKey, ScraperConfig,
    ScraperEvent,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One scripted reply of a [`ScriptedQuery`]
#[derive(Debug, Clone)]
pub enum Reply {
    Records(NameServers),
    Fail(String),
}

impl Reply {
    /// A successful reply with no NS records
    pub fn empty() -> Self {
        Reply::Records(NameServers::new())
    }

    /// A successful reply built from `(subdomain, values)` pairs
    pub fn records(entries: &[(&str, &[&str])]) -> Self {
        Reply::Records(
            entries
                .iter()
                .map(|(subdomain, values)| (subdomain.to_string(), set(values)))
                .collect(),
        )
    }

    pub fn fail(message: &str) -> Self {
        Reply::Fail(message.to_string())
    }
}

/// A NameServerQuery that replays scripted replies per root domain
///
/// Replies are consumed in order; once a root domain's script has a
/// single reply left, that reply is repeated. Root domains without a
/// script return an empty record set.
pub struct ScriptedQuery {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    /// Calls per root domain
    calls: Arc<Mutex<HashMap<String, usize>>>,
    /// Total calls across all root domains
    total_calls: Arc<AtomicUsize>,
    /// Artificial latency of every call
    delay: Duration,
}

impl ScriptedQuery {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            total_calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Queue replies for `root_domain`
    pub fn script(self, root_domain: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(root_domain.to_string(), replies.into());
        self
    }

    /// Delay every call by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get the number of times get() was called for `root_domain`
    pub fn call_count(&self, root_domain: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(root_domain)
            .copied()
            .unwrap_or(0)
    }

    /// Get the number of times get() was called for any root domain
    pub fn total_call_count(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Create a new ScriptedQuery that shares scripts and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            scripts: Arc::clone(&other.scripts),
            calls: Arc::clone(&other.calls),
            total_calls: Arc::clone(&other.total_calls),
            delay: other.delay,
        }
    }

    fn next_reply(&self, root_domain: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(root_domain) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap(),
            Some(replies) => replies.front().cloned().unwrap_or_else(Reply::empty),
            None => Reply::empty(),
        }
    }
}

#[async_trait::async_trait]
impl NameServerQuery for ScriptedQuery {
    async fn get(&self, root_domain: &str) -> Result<NameServers> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(root_domain.to_string())
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_reply(root_domain) {
            Reply::Records(records) => Ok(records),
            Reply::Fail(message) => Err(Error::http(message)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// A ChangeNotifier that records every owner key it receives
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    owners: Arc<Mutex<Vec<OwnerKey>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner keys received so far, sorted
    pub fn notified(&self) -> Vec<OwnerKey> {
        let mut owners = self.owners.lock().unwrap().clone();
        owners.sort();
        owners
    }
}

impl nsscrape_core::ChangeNotifier for RecordingNotifier {
    fn notify(&self, owner: OwnerKey) {
        self.owners.lock().unwrap().push(owner);
    }
}

/// Build a name-server set from string slices
pub fn set(values: &[&str]) -> NameServerSet {
    values.iter().map(|value| value.to_string()).collect()
}

/// Helper to create a minimal ScraperConfig for testing
pub fn minimal_config(root_domains: &[&str]) -> ScraperConfig {
    ScraperConfig::new(root_domains.iter().copied())
}

/// Build a scraper over a ScriptedQuery sharing counters with `query`
pub fn scraper(
    query: &ScriptedQuery,
    notifier: &RecordingNotifier,
    config: ScraperConfig,
) -> (NameServerScraper, mpsc::Receiver<ScraperEvent>) {
    NameServerScraper::new(
        Box::new(ScriptedQuery::sharing_counters_with(query)),
        Box::new(notifier.clone()),
        config,
    )
    .expect("scraper construction succeeds")
}

/// Run the scraper for `duration` of (virtual) time, then shut it down
pub async fn run_for(scraper: &NameServerScraper, duration: Duration) {
    let shutdown = CancellationToken::new();

    let handle = {
        let scraper = scraper.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scraper.start(shutdown).await })
    };

    tokio::time::sleep(duration).await;
    shutdown.cancel();

    handle
        .await
        .expect("scraper task joins")
        .expect("scraper stops cleanly");
}

/// Drain every event currently buffered in `events`
pub fn drain_events(events: &mut mpsc::Receiver<ScraperEvent>) -> Vec<ScraperEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
