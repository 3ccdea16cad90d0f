// # Cloudflare Name Server Query
//
// This crate provides a Cloudflare-backed `NameServerQuery` for the NS
// scraper. A root domain maps to the Cloudflare zone of the same name; every
// NS record in that zone is reported, grouped by record name.
//
// ## Behavior
//
// - ✅ One zone lookup plus one request per page of NS records per scrape
// - ✅ Full error propagation to the scraper (it owns retries and backoff)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific error handling for HTTP status codes (401/403, 404, 429, 5xx)
// - ✅ Record values normalized (lower-case, no trailing dot)
// - ❌ NO retry logic (owned by NameServerScraper)
// - ❌ NO backoff logic (owned by NameServerScraper)
// - ❌ NO caching between scrapes
// - ❌ NO background tasks
//
// ## Security Requirements
//
// - API token NEVER appears in logs
// - Query MUST fail fast if token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=NS&page=...`

use async_trait::async_trait;
use nsscrape_core::config::QueryConfig;
use nsscrape_core::traits::{NameServerQuery, NameServerQueryFactory, NameServers};
use nsscrape_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Records requested per page (Cloudflare maximum for DNS listing)
const RECORDS_PER_PAGE: u32 = 100;

/// Cloudflare name-server query
///
/// Stateless and single-shot: every `get` re-resolves the zone and lists
/// its NS records from scratch.
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct CloudflareQuery {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Account ID used to disambiguate zones with the same name
    account_id: Option<String>,

    /// API base URL
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

impl std::fmt::Debug for CloudflareQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareQuery")
            .field("api_token", &"<REDACTED>")
            .field("account_id", &self.account_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Envelope of every Cloudflare API v4 response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    name: String,
    content: String,
}

impl CloudflareQuery {
    /// Create a new Cloudflare query
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:Read and DNS:Read permissions
    /// - `account_id`: Optional account ID
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the token is empty
    /// - `Error::Backend` if the HTTP client cannot be built
    pub fn new(api_token: impl Into<String>, account_id: Option<String>) -> Result<Self> {
        Self::with_base_url(api_token, account_id, CLOUDFLARE_API_BASE)
    }

    /// Create a query against a different API endpoint (e.g. a local mock)
    pub fn with_base_url(
        api_token: impl Into<String>,
        account_id: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::backend("cloudflare", format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            api_token,
            account_id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Get the zone ID of the zone named `root_domain`
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn get_zone_id(&self, root_domain: &str) -> Result<String> {
        tracing::debug!("Looking up zone ID for root domain: {}", root_domain);

        let mut params = vec![("name", root_domain.to_string())];
        if let Some(ref account_id) = self.account_id {
            params.push(("account.id", account_id.clone()));
        }

        let url = format!("{}/zones", self.base_url);
        let zones: ApiResponse<Vec<Zone>> = self
            .get_json(&url, &params, &format!("Zone not found: {}", root_domain))
            .await?;

        let zone = zones
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("Zone not found: {}", root_domain)))?;

        tracing::debug!("Found zone ID: {}", zone.id);
        Ok(zone.id)
    }

    /// List every NS record in a zone, following pagination
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?type=NS&per_page=100&page=1
    /// Authorization: Bearer <token>
    /// ```
    async fn list_ns_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let params = [
                ("type", "NS".to_string()),
                ("per_page", RECORDS_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];

            let response: ApiResponse<Vec<DnsRecord>> = self
                .get_json(&url, &params, &format!("Zone not found: {}", zone_id))
                .await?;

            let total_pages = response
                .result_info
                .and_then(|info| info.total_pages)
                .unwrap_or(1);
            records.extend(response.result.unwrap_or_default());

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        tracing::debug!("Listed {} NS records in zone {}", records.len(), zone_id);
        Ok(records)
    }

    /// Send an authenticated GET and decode the JSON body
    async fn get_json<T>(&self, url: &str, params: &[(&str, String)], not_found: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(url)
            .query(params)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::backend("cloudflare", format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(map_status(status, &error_text, not_found));
        }

        response
            .json()
            .await
            .map_err(|e| Error::backend("cloudflare", format!("Failed to parse response: {}", e)))
    }
}

/// Map a non-success HTTP status to a scraper error
fn map_status(status: u16, error_text: &str, not_found: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "Invalid API token or insufficient permissions. Status: {}",
            status
        )),
        404 => Error::not_found(not_found),
        429 => Error::rate_limited(format!(
            "Rate limit exceeded. Please retry later. Status: {}",
            status
        )),
        500..=599 => Error::backend(
            "cloudflare",
            format!("Cloudflare server error (transient): {} - {}", status, error_text),
        ),
        _ => Error::backend(
            "cloudflare",
            format!("Request failed: {} - {}", status, error_text),
        ),
    }
}

/// Normalize a record name or NS target for comparison
fn normalize(value: &str) -> String {
    value.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Group NS records by name into the observed name-server map
fn group_ns_records(records: Vec<DnsRecord>) -> NameServers {
    let mut name_servers = NameServers::new();

    for record in records {
        name_servers
            .entry(normalize(&record.name))
            .or_default()
            .insert(normalize(&record.content));
    }

    name_servers
}

#[async_trait]
impl NameServerQuery for CloudflareQuery {
    /// List the delegated NS records under a root domain
    ///
    /// # Returns
    ///
    /// - `Ok(NameServers)`: Subdomain -> NS targets (empty if none are delegated)
    /// - `Err(Error)`: If any API call fails (the scraper retries after its backoff)
    async fn get(&self, root_domain: &str) -> Result<NameServers> {
        let zone_id = self.get_zone_id(root_domain).await?;
        let records = self.list_ns_records(&zone_id).await?;
        Ok(group_ns_records(records))
    }

    fn backend_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Factory for creating Cloudflare queries
pub struct CloudflareQueryFactory;

impl NameServerQueryFactory for CloudflareQueryFactory {
    fn create(&self, config: &QueryConfig) -> Result<Box<dyn NameServerQuery>> {
        match config {
            QueryConfig::Cloudflare {
                api_token,
                account_id,
            } => {
                if api_token.is_empty() {
                    return Err(Error::config("Cloudflare API token is required"));
                }

                Ok(Box::new(CloudflareQuery::new(
                    api_token.clone(),
                    account_id.clone(),
                )?))
            }
            _ => Err(Error::config("Invalid config for Cloudflare query")),
        }
    }
}

/// Register the Cloudflare query with a registry
///
/// # Example
///
/// ```rust
/// use nsscrape_core::QueryRegistry;
///
/// let registry = QueryRegistry::new();
/// nsscrape_query_cloudflare::register(&registry);
/// assert!(registry.has_query("cloudflare"));
/// ```
pub fn register(registry: &nsscrape_core::QueryRegistry) {
    registry.register_query("cloudflare", Box::new(CloudflareQueryFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsscrape_core::NameServerSet;

    fn record(name: &str, content: &str) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    fn set(values: &[&str]) -> NameServerSet {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_factory_creation() {
        let factory = CloudflareQueryFactory;

        let config = QueryConfig::Cloudflare {
            api_token: "test_token".to_string(),
            account_id: None,
        };

        let query = factory.create(&config).unwrap();
        assert_eq!(query.backend_name(), "cloudflare");
    }

    #[test]
    fn test_factory_missing_token() {
        let factory = CloudflareQueryFactory;

        let config = QueryConfig::Cloudflare {
            api_token: "".to_string(),
            account_id: None,
        };

        assert!(matches!(factory.create(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_factory_rejects_other_config() {
        let config = QueryConfig::Custom {
            factory: "cloudflare".to_string(),
            config: serde_json::Value::Null,
        };
        assert!(CloudflareQueryFactory.create(&config).is_err());
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            CloudflareQuery::new("", None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_api_token_not_exposed_in_debug() {
        let query = CloudflareQuery::new("secret_token_12345", None).unwrap();

        let debug_str = format!("{:?}", query);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("CloudflareQuery"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let query =
            CloudflareQuery::with_base_url("token", None, "http://127.0.0.1:8080/").unwrap();
        assert_eq!(query.base_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_register() {
        let registry = nsscrape_core::QueryRegistry::new();
        register(&registry);
        assert!(registry.has_query("cloudflare"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(401, "", "zone"), Error::Authentication(_)));
        assert!(matches!(map_status(403, "", "zone"), Error::Authentication(_)));
        assert!(matches!(map_status(404, "", "zone"), Error::NotFound(ref m) if m == "zone"));
        assert!(matches!(map_status(429, "", "zone"), Error::RateLimited(_)));
        assert!(matches!(map_status(502, "bad gateway", "zone"), Error::Backend { .. }));
        assert!(matches!(map_status(418, "teapot", "zone"), Error::Backend { .. }));
    }

    #[test]
    fn test_group_ns_records() {
        let records = vec![
            record("example.com", "ns1.cloudflare.com"),
            record("a.example.com", "NS1.Example.NET."),
            record("a.example.com", "ns2.example.net"),
            record("B.example.com.", "ns3.example.net."),
            record("a.example.com", "ns1.example.net"),
        ];

        let grouped = group_ns_records(records);

        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped["example.com"], set(&["ns1.cloudflare.com"]));
        assert_eq!(
            grouped["a.example.com"],
            set(&["ns1.example.net", "ns2.example.net"])
        );
        assert_eq!(grouped["b.example.com"], set(&["ns3.example.net"]));
    }

    #[test]
    fn test_parse_record_page() {
        let body = serde_json::json!({
            "success": true,
            "errors": [],
            "result": [
                { "id": "1", "type": "NS", "name": "sub.example.com", "content": "ns1.example.net", "ttl": 1 },
                { "id": "2", "type": "NS", "name": "sub.example.com", "content": "ns2.example.net", "ttl": 1 }
            ],
            "result_info": { "page": 1, "per_page": 100, "count": 2, "total_count": 2, "total_pages": 1 }
        });

        let page: ApiResponse<Vec<DnsRecord>> = serde_json::from_value(body).unwrap();
        assert_eq!(page.result_info.and_then(|info| info.total_pages), Some(1));

        let grouped = group_ns_records(page.result.unwrap());
        assert_eq!(
            grouped["sub.example.com"],
            set(&["ns1.example.net", "ns2.example.net"])
        );
    }

    #[test]
    fn test_parse_zone_lookup_without_result() {
        let body = serde_json::json!({ "success": false, "errors": [{ "code": 1000 }], "result": null });
        let zones: ApiResponse<Vec<Zone>> = serde_json::from_value(body).unwrap();
        assert!(zones.result.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_an_error() {
        // Port 9 (discard) is not expected to serve HTTP
        let query = CloudflareQuery::with_base_url("token", None, "http://127.0.0.1:9").unwrap();
        let err = query.get("example.com").await.unwrap_err();
        assert!(matches!(err, Error::Backend { ref backend, .. } if backend == "cloudflare"));
    }
}
