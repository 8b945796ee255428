//! Source of the IP ranges allowed to call the deploy webhook.
//!
//! Production uses the `hooks` list published at `https://api.github.com/meta`,
//! cached for a while. A fixed list from the config replaces the fetch on
//! hosts without outbound access (and in tests).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("easyblog/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum AllowListError {
    #[error("allow-list fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("invalid IP range {0:?}")]
    InvalidRange(String),

    #[error("allow-list is empty")]
    Empty,
}

#[async_trait]
pub trait AllowListSource: Send + Sync {
    /// Current set of allowed networks.
    async fn ranges(&self) -> Result<Arc<Vec<IpNet>>, AllowListError>;

    /// Whether `ip` falls inside any allowed network.
    async fn contains(&self, ip: IpAddr) -> Result<bool, AllowListError> {
        let ip = ip.to_canonical();
        Ok(self.ranges().await?.iter().any(|net| net.contains(&ip)))
    }
}

/// Parse one CIDR range. A bare address is taken as a single-host network.
pub fn parse_range(raw: &str) -> Result<IpNet, AllowListError> {
    let raw = raw.trim();
    raw.parse::<IpNet>()
        .or_else(|_| raw.parse::<IpAddr>().map(IpNet::from))
        .map_err(|_| AllowListError::InvalidRange(raw.to_string()))
}

/// Fixed list from `webhook.allow_ranges`.
#[derive(Debug, Clone)]
pub struct StaticAllowList {
    ranges: Arc<Vec<IpNet>>,
}

impl StaticAllowList {
    pub fn parse(raw: &[String]) -> Result<Self, AllowListError> {
        let ranges = raw
            .iter()
            .map(|r| parse_range(r))
            .collect::<Result<Vec<_>, _>>()?;
        if ranges.is_empty() {
            return Err(AllowListError::Empty);
        }
        Ok(Self {
            ranges: Arc::new(ranges),
        })
    }
}

#[async_trait]
impl AllowListSource for StaticAllowList {
    async fn ranges(&self) -> Result<Arc<Vec<IpNet>>, AllowListError> {
        Ok(Arc::clone(&self.ranges))
    }
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    #[serde(default)]
    hooks: Vec<String>,
}

/// GitHub meta API with a TTL cache.
///
/// Every fetch is bounded by the client timeout. A failed fetch is returned
/// as an error (the caller rejects the request) and leaves the cache as is,
/// so a stale-but-valid list is never extended past its TTL.
pub struct GithubMeta {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<Vec<IpNet>>)>>,
}

impl GithubMeta {
    pub fn new(url: impl Into<String>, ttl: Duration, timeout: Duration) -> Result<Self, AllowListError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            ttl,
            cache: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<Vec<IpNet>, AllowListError> {
        let meta: MetaResponse = self
            .client
            .get(&self.url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let ranges: Vec<IpNet> = meta
            .hooks
            .iter()
            .filter_map(|raw| match parse_range(raw) {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!(error = %e, "skipping hooks range");
                    None
                }
            })
            .collect();
        if ranges.is_empty() {
            return Err(AllowListError::Empty);
        }
        Ok(ranges)
    }
}

#[async_trait]
impl AllowListSource for GithubMeta {
    async fn ranges(&self) -> Result<Arc<Vec<IpNet>>, AllowListError> {
        // Held across the fetch: concurrent requests wait for one refresh.
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, ranges)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                debug!("allow-list served from cache");
                return Ok(Arc::clone(ranges));
            }
        }

        let ranges = Arc::new(self.fetch().await?);
        info!(url = %self.url, ranges = ranges.len(), "allow-list refreshed");
        *cache = Some((Instant::now(), Arc::clone(&ranges)));
        Ok(ranges)
    }
}
