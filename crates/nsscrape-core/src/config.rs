//! Configuration types for the name-server scraper
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Root domains this instance is responsible for (fixed for its lifetime)
    pub root_domains: Vec<String>,

    /// Steady-state interval between scrapes of a root domain (in seconds)
    #[serde(default = "default_scrape_period_secs")]
    pub scrape_period_secs: u64,

    /// Retry interval after a failed scrape (in seconds)
    ///
    /// Must be strictly smaller than `scrape_period_secs`.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Capacity of the monitoring event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Query backend configuration
    #[serde(default)]
    pub query: QueryConfig,
}

impl ScraperConfig {
    /// Create a new configuration with defaults for the given root domains
    pub fn new<I, S>(root_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root_domains: root_domains.into_iter().map(Into::into).collect(),
            scrape_period_secs: default_scrape_period_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            query: QueryConfig::default(),
        }
    }

    /// Set the steady-state scrape period
    pub fn with_scrape_period_secs(mut self, secs: u64) -> Self {
        self.scrape_period_secs = secs;
        self
    }

    /// Set the error backoff
    pub fn with_error_backoff_secs(mut self, secs: u64) -> Self {
        self.error_backoff_secs = secs;
        self
    }

    /// Set the query backend
    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    /// Steady-state scrape period
    pub fn scrape_period(&self) -> Duration {
        Duration::from_secs(self.scrape_period_secs)
    }

    /// Retry interval after a failed scrape
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.root_domains.is_empty() {
            return Err(crate::Error::config("No root domains configured"));
        }

        let mut seen = HashSet::new();
        for root_domain in &self.root_domains {
            if root_domain.is_empty() {
                return Err(crate::Error::config("Root domain cannot be empty"));
            }
            if !seen.insert(root_domain.as_str()) {
                return Err(crate::Error::config(format!(
                    "Root domain configured twice: {root_domain}"
                )));
            }
        }

        if self.scrape_period_secs == 0 {
            return Err(crate::Error::config("Scrape period must be > 0"));
        }

        if self.error_backoff_secs == 0 || self.error_backoff_secs >= self.scrape_period_secs {
            return Err(crate::Error::config(format!(
                "Error backoff must be > 0 and shorter than the scrape period ({}s), got {}s",
                self.scrape_period_secs, self.error_backoff_secs
            )));
        }

        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        self.query.validate()
    }
}

/// Query backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryConfig {
    /// Cloudflare zone listing
    Cloudflare {
        /// Cloudflare API token
        api_token: String,
        /// Account ID used to disambiguate zones (optional)
        account_id: Option<String>,
    },

    /// Custom query backend, supplied directly or via a registered factory
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl QueryConfig {
    /// Validate the query configuration
    ///
    /// Credentials are checked by the backend factory, not here, so a
    /// query injected directly does not need a configured token.
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            QueryConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom query factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &str {
        match self {
            QueryConfig::Cloudflare { .. } => "cloudflare",
            QueryConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig::Custom {
            factory: "injected".to_string(),
            config: serde_json::Value::Null,
        }
    }
}

fn default_scrape_period_secs() -> u64 {
    2 * 60 * 60
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1000
}
