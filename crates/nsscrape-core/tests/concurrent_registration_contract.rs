//! Architectural Contract Test: Concurrent Registration
//!
//! This test verifies that the registration API and the scrape loop can
//! touch the tracked domains at the same time from different threads.
//!
//! Constraints verified:
//! - A scrape never creates an entry for an untracked subdomain
//! - Registrations made while scrapes run are never lost
//! - Each owner is notified at most once per scrape pass
//!
//! If this test fails, someone has added:
//! - A lookup-then-mutate sequence split across two lock acquisitions
//! - Scrape results written back without checking the entry still exists
//! - Notifications sent once per observed value instead of once per endpoint

mod common;

use common::*;
use nsscrape_core::OwnerKey;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const STABLE: usize = 4;
const CHURNING: usize = 4;
const NEW_VALUE: &[&str] = &["new-value"];

fn stable_subdomain(i: usize) -> String {
    format!("stable-{i}.domain.com")
}

fn churn_subdomain(i: usize) -> String {
    format!("churn-{i}.domain.com")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registrations_race_scrapes_without_losing_or_inventing_entries() {
    let stable: Vec<String> = (0..STABLE).map(stable_subdomain).collect();
    let churning: Vec<String> = (0..CHURNING).map(churn_subdomain).collect();

    let mut observed: Vec<(&str, &[&str])> = vec![("untracked.domain.com", NEW_VALUE)];
    observed.extend(stable.iter().map(|s| (s.as_str(), NEW_VALUE)));
    observed.extend(churning.iter().map(|s| (s.as_str(), NEW_VALUE)));

    let query = ScriptedQuery::new().script("domain.com", vec![Reply::records(&observed)]);
    let notifier = RecordingNotifier::new();
    let config = minimal_config(&["domain.com"])
        .with_scrape_period_secs(2)
        .with_error_backoff_secs(1);
    let (scraper, _events) = scraper(&query, &notifier, config);

    for (i, subdomain) in stable.iter().enumerate() {
        scraper.add_endpoint(
            OwnerKey::new("stable", format!("owner-{i}")),
            subdomain,
            set(&["old-value"]),
        );
    }

    let shutdown = CancellationToken::new();
    let running = {
        let scraper = scraper.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scraper.start(shutdown).await })
    };

    // Churn registrations across both scrape passes (0s and 2s)
    let deadline = tokio::time::Instant::now() + Duration::from_millis(2500);
    let mut hammers = JoinSet::new();
    for (i, subdomain) in churning.iter().cloned().enumerate() {
        let scraper = scraper.clone();
        hammers.spawn(async move {
            let owner = OwnerKey::new("churn", format!("owner-{i}"));
            while tokio::time::Instant::now() < deadline {
                scraper.add_endpoint(owner.clone(), &subdomain, set(&["old-value"]));
                tokio::task::yield_now().await;
                scraper.remove_endpoint(&subdomain);
                tokio::task::yield_now().await;
            }
            scraper.add_endpoint(owner, &subdomain, set(&["old-value"]));
        });
    }
    while let Some(joined) = hammers.join_next().await {
        joined.unwrap();
    }

    shutdown.cancel();
    running.await.unwrap().unwrap();

    let passes = query.call_count("domain.com");
    assert!(passes >= 2, "expected two scrape passes, got {passes}");

    // Exactly the registered subdomains are tracked
    let snapshot = scraper.snapshot();
    let tracked: BTreeSet<String> = snapshot["domain.com"].keys().cloned().collect();
    let expected: BTreeSet<String> = stable.iter().chain(&churning).cloned().collect();
    assert_eq!(tracked, expected);
    assert_eq!(scraper.get_endpoint("untracked.domain.com").1, set(&[]));

    // Stable endpoints drift once, on the first pass
    for subdomain in &stable {
        assert_eq!(scraper.get_endpoint(subdomain).1, set(&["new-value"]));
    }

    let notified = notifier.notified();
    for i in 0..STABLE {
        let owner = OwnerKey::new("stable", format!("owner-{i}"));
        assert_eq!(notified.iter().filter(|key| **key == owner).count(), 1);
    }
    for i in 0..CHURNING {
        let owner = OwnerKey::new("churn", format!("owner-{i}"));
        let count = notified.iter().filter(|key| **key == owner).count();
        assert!(
            count <= passes,
            "{owner} notified {count} times over {passes} passes"
        );
    }
    assert!(notified.iter().all(|key| key.namespace == "stable" || key.namespace == "churn"));
}
