// # nsscraped - NS Scraper Daemon
//
// This is a THIN integration layer only:
// - DO NOT add scraping, diffing, or retry logic here
// - All scraper logic lives in nsscrape-core
// - Configuration is via environment variables only
//
// The nsscraped daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering query backends
// 4. Registering the endpoints to track
// 5. Running the scraper until SIGINT/SIGTERM
//
// ## Configuration
//
// ### Scraper
// - `NSSCRAPE_ROOT_DOMAINS`: Comma-separated root domains (required)
// - `NSSCRAPE_SCRAPE_PERIOD_SECS`: Interval between scrapes of a root domain (default 7200)
// - `NSSCRAPE_ERROR_BACKOFF_SECS`: Retry interval after a failed scrape (default 10)
//
// ### Query Backend
// - `NSSCRAPE_QUERY_TYPE`: Backend type (cloudflare)
// - `NSSCRAPE_CLOUDFLARE_API_TOKEN`: API token
// - `NSSCRAPE_CLOUDFLARE_ACCOUNT_ID`: Account ID (optional)
//
// ### Endpoints
// - `NSSCRAPE_ENDPOINTS`: Comma-separated `namespace/name=subdomain` entries
//
// ### Logging
// - `NSSCRAPE_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export NSSCRAPE_ROOT_DOMAINS=example.com
// export NSSCRAPE_CLOUDFLARE_API_TOKEN=your_token
// export NSSCRAPE_ENDPOINTS=clusters/alpha=alpha.example.com,clusters/beta=beta.example.com
//
// nsscraped
// ```

use anyhow::Result;
use nsscrape_core::{
    NameServerScraper, NameServerSet, OwnerKey, QueryConfig, QueryRegistry, ScraperConfig,
    ScraperEvent, TrackedDomains, notification_channel,
};
use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Buffered change notifications before new ones are dropped
const NOTIFICATION_CAPACITY: usize = 1024;

/// How long in-flight scrapes may take to finish after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum NsScrapeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<NsScrapeExitCode> for ExitCode {
    fn from(code: NsScrapeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    root_domains: Vec<String>,
    query_type: String,
    cloudflare_api_token: Option<String>,
    cloudflare_account_id: Option<String>,
    scrape_period_secs: Option<u64>,
    error_backoff_secs: Option<u64>,
    endpoints: Vec<(OwnerKey, String)>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse_secs = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|value| {
                    value.trim().parse::<u64>().map_err(|e| {
                        anyhow::anyhow!("{} must be a whole number of seconds: {}", key, e)
                    })
                })
                .transpose()
        };

        Ok(Self {
            root_domains: split_list(&lookup("NSSCRAPE_ROOT_DOMAINS").unwrap_or_default())
                .iter()
                .map(|root_domain| root_domain.to_ascii_lowercase())
                .collect(),
            query_type: lookup("NSSCRAPE_QUERY_TYPE").unwrap_or_else(|| "cloudflare".to_string()),
            cloudflare_api_token: lookup("NSSCRAPE_CLOUDFLARE_API_TOKEN"),
            cloudflare_account_id: lookup("NSSCRAPE_CLOUDFLARE_ACCOUNT_ID")
                .filter(|id| !id.is_empty()),
            scrape_period_secs: parse_secs("NSSCRAPE_SCRAPE_PERIOD_SECS")?,
            error_backoff_secs: parse_secs("NSSCRAPE_ERROR_BACKOFF_SECS")?,
            endpoints: split_list(&lookup("NSSCRAPE_ENDPOINTS").unwrap_or_default())
                .iter()
                .map(|entry| parse_endpoint(entry))
                .collect::<Result<_>>()?,
            log_level: lookup("NSSCRAPE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// This performs validation including:
    /// - Required field presence
    /// - Domain name syntax
    /// - Numeric range validation
    /// - Type enumeration validation
    fn validate(&self) -> Result<()> {
        if self.root_domains.is_empty() {
            anyhow::bail!(
                "NSSCRAPE_ROOT_DOMAINS must contain at least one root domain. \
                Set it via: export NSSCRAPE_ROOT_DOMAINS=example.com"
            );
        }

        for root_domain in &self.root_domains {
            validate_domain_name(root_domain)?;
        }

        match self.query_type.as_str() {
            "cloudflare" => self.validate_cloudflare()?,
            _ => anyhow::bail!(
                "NSSCRAPE_QUERY_TYPE '{}' is not supported. \
                Supported types: cloudflare",
                self.query_type
            ),
        }

        if let Some(period) = self.scrape_period_secs
            && !(10..=7 * 24 * 60 * 60).contains(&period)
        {
            anyhow::bail!(
                "NSSCRAPE_SCRAPE_PERIOD_SECS must be between 10 and 604800 seconds. Got: {}",
                period
            );
        }

        if let Some(backoff) = self.error_backoff_secs
            && !(1..=3600).contains(&backoff)
        {
            anyhow::bail!(
                "NSSCRAPE_ERROR_BACKOFF_SECS must be between 1 and 3600 seconds. Got: {}",
                backoff
            );
        }

        let tracked = TrackedDomains::new(self.root_domains.iter().map(String::as_str));
        for (owner, subdomain) in &self.endpoints {
            validate_domain_name(subdomain)?;

            if tracked.root_domain_for(subdomain).is_none() {
                anyhow::bail!(
                    "NSSCRAPE_ENDPOINTS entry {}={} is not under any root domain",
                    owner,
                    subdomain
                );
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NSSCRAPE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        // Cross-field rules (backoff shorter than period, no duplicates)
        self.scraper_config().validate()?;

        Ok(())
    }

    fn validate_cloudflare(&self) -> Result<()> {
        let token = self.cloudflare_api_token.as_deref().unwrap_or_default();

        if token.is_empty() {
            anyhow::bail!(
                "NSSCRAPE_CLOUDFLARE_API_TOKEN is required. \
                Set it via: export NSSCRAPE_CLOUDFLARE_API_TOKEN=your_token"
            );
        }

        // Cloudflare API tokens are 40 characters
        if token.len() < 20 {
            anyhow::bail!(
                "NSSCRAPE_CLOUDFLARE_API_TOKEN appears too short ({} chars). \
                Cloudflare tokens are typically 40 characters.",
                token.len()
            );
        }

        let token_lower = token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower.contains("example")
        {
            anyhow::bail!(
                "NSSCRAPE_CLOUDFLARE_API_TOKEN appears to be a placeholder. \
                Use an actual API token."
            );
        }

        Ok(())
    }

    /// Build the scraper configuration
    fn scraper_config(&self) -> ScraperConfig {
        let mut config = ScraperConfig::new(self.root_domains.iter().cloned());

        if let Some(period) = self.scrape_period_secs {
            config = config.with_scrape_period_secs(period);
        }
        if let Some(backoff) = self.error_backoff_secs {
            config = config.with_error_backoff_secs(backoff);
        }

        config.with_query(QueryConfig::Cloudflare {
            api_token: self.cloudflare_api_token.clone().unwrap_or_default(),
            account_id: self.cloudflare_account_id.clone(),
        })
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Split a comma-separated list, dropping blanks
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a `namespace/name=subdomain` endpoint entry
fn parse_endpoint(entry: &str) -> Result<(OwnerKey, String)> {
    let (owner, subdomain) = entry.split_once('=').ok_or_else(|| {
        anyhow::anyhow!(
            "NSSCRAPE_ENDPOINTS entry '{}' must look like namespace/name=subdomain",
            entry
        )
    })?;

    let owner: OwnerKey = owner.trim().parse()?;

    // Backends report record names in lower case
    Ok((owner, subdomain.trim().to_ascii_lowercase()))
}

/// Validate that a string is a valid domain name
///
/// Basic DNS domain name validation per RFC 1035. Not comprehensive but
/// catches common errors.
fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        anyhow::bail!("Domain name cannot be empty");
    }

    // Total length limit (RFC 1035: 253 chars max)
    if domain.len() > 253 {
        anyhow::bail!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        );
    }

    for label in domain.split('.') {
        if label.is_empty() {
            anyhow::bail!("Domain name has empty label: '{}'", domain);
        }

        if label.len() > 63 {
            anyhow::bail!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            );
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            anyhow::bail!(
                "Domain label contains invalid characters. Label: '{}'. \
                Valid: alphanumeric and hyphen only.",
                label
            );
        }

        if label.starts_with('-') || label.ends_with('-') {
            anyhow::bail!(
                "Domain label cannot start or end with hyphen. Label: '{}'",
                label
            );
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return NsScrapeExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return NsScrapeExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NsScrapeExitCode::ConfigError.into();
    }

    info!("Starting nsscraped daemon");
    info!(
        "Configuration loaded: {} root domain(s), {} endpoint(s)",
        config.root_domains.len(),
        config.endpoints.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NsScrapeExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => NsScrapeExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {}", e);
                NsScrapeExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {}", e);
                NsScrapeExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Failure phase of the daemon, mapped to an exit code
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Run the daemon
async fn run_daemon(config: Config) -> std::result::Result<(), DaemonError> {
    let registry = QueryRegistry::new();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare query backend");
        nsscrape_query_cloudflare::register(&registry);
    }

    let scraper_config = config.scraper_config();
    let query = registry
        .create_query(&scraper_config.query)
        .map_err(|e| DaemonError::Startup(e.into()))?;

    let (notifier, mut changes) = notification_channel(NOTIFICATION_CAPACITY);
    let (scraper, mut events) = NameServerScraper::new(query, Box::new(notifier), scraper_config)
        .map_err(|e| DaemonError::Startup(e.into()))?;

    // Start from an empty value set; the first scrape reports current delegations
    for (owner, subdomain) in &config.endpoints {
        info!(%owner, subdomain = %subdomain, "Tracking endpoint");
        scraper.add_endpoint(owner.clone(), subdomain, NameServerSet::new());
    }

    let shutdown = CancellationToken::new();
    let scraper_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scraper.start(shutdown).await })
    };

    let change_logger = tokio::spawn(async move {
        while let Some(owner) = changes.next().await {
            info!(%owner, "Endpoint name servers changed");
        }
    });

    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let signal = wait_for_shutdown_signal().await;
    shutdown.cancel();
    let signal = signal.map_err(DaemonError::Runtime)?;
    info!("Received shutdown signal: {}", signal);

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, scraper_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(DaemonError::Runtime(e.into())),
        Ok(Err(e)) => {
            return Err(DaemonError::Runtime(anyhow::anyhow!(
                "Scraper task failed: {}",
                e
            )));
        }
        Err(_) => {
            return Err(DaemonError::Runtime(anyhow::anyhow!(
                "Scraper did not stop within {:?}",
                SHUTDOWN_TIMEOUT
            )));
        }
    }

    // The scraper is gone, so both channels are closed
    if let Err(e) = change_logger.await {
        warn!("Change logger failed: {}", e);
    }
    if let Err(e) = event_logger.await {
        warn!("Event logger failed: {}", e);
    }

    info!("Shutting down daemon");
    Ok(())
}

fn log_event(event: &ScraperEvent) {
    match event {
        ScraperEvent::Started { root_domains } => {
            info!(root_domains, "Scraper started");
        }
        ScraperEvent::ScrapeSucceeded {
            root_domain,
            changed,
        } => {
            debug!(root_domain = %root_domain, changed, "Scrape succeeded");
        }
        ScraperEvent::ScrapeFailed {
            root_domain,
            error,
            consecutive_failures,
        } => {
            warn!(
                root_domain = %root_domain,
                consecutive_failures,
                "Scrape failed: {}", error
            );
        }
        ScraperEvent::Stopped { reason } => {
            info!("Scraper stopped: {}", reason);
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
