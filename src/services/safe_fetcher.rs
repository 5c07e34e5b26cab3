//! Outbound HTTP for enrichers, guarded against SSRF.
//!
//! Every URL (including each redirect hop) must be http(s), carry no
//! userinfo, and point at a host whose addresses are all public. Hostnames
//! are resolved and *every* returned address is checked, and the HTTP client
//! itself resolves through the same guard so it only ever connects to
//! addresses that passed the check.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{Client, Response, StatusCode};
use url::{Host, Url};

use crate::error::{AppError, Result};

use super::text::sanitize_utf8;

const MAX_REDIRECTS: usize = 10;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (compatible; Learnd/1.0)";
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml";

/// Address policy shared by the pre-flight check and the client's resolver.
#[derive(Debug, Clone)]
pub struct UrlGuard {
    allowed_schemes: HashSet<String>,
    blocked_cidrs: Vec<IpNet>,
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlGuard {
    pub fn new() -> Self {
        let blocked_cidrs = [
            "0.0.0.0/8",
            "10.0.0.0/8",
            "127.0.0.0/8",
            "169.254.0.0/16", // Link-local / cloud metadata
            "172.16.0.0/12",
            "192.168.0.0/16",
            "224.0.0.0/4",
            "::/128",
            "::1/128",
            "fc00::/7",  // IPv6 unique local
            "fe80::/10", // IPv6 link-local
            "ff00::/8",
        ]
        .iter()
        .filter_map(|cidr| cidr.parse().ok())
        .collect();

        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            blocked_cidrs,
        }
    }

    /// Block an additional CIDR range.
    pub fn block_cidr(mut self, cidr: IpNet) -> Self {
        self.blocked_cidrs.push(cidr);
        self
    }

    pub fn is_blocked_ip(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };

        let by_class = match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_multicast()
                    || v4.is_unspecified()
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_multicast() || v6.is_unspecified(),
        };

        by_class || self.blocked_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    /// Resolved addresses for `host`: the set must be non-empty and entirely public.
    pub fn check_addrs<I>(&self, host: &str, addrs: I) -> Result<()>
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let mut seen = 0;
        for ip in addrs {
            seen += 1;
            if self.is_blocked_ip(ip) {
                return Err(AppError::InvalidUrl(format!(
                    "host {} resolves to private IP {}",
                    host, ip
                )));
            }
        }
        if seen == 0 {
            return Err(AppError::InvalidUrl(format!("host {} has no addresses", host)));
        }
        Ok(())
    }

    /// Checks that need no network. Returns the hostname still to be resolved, if any.
    fn check_static(&self, url: &Url) -> Result<Option<String>> {
        if !self.allowed_schemes.contains(url.scheme()) {
            return Err(AppError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(AppError::InvalidUrl("userinfo not allowed".to_string()));
        }

        match url.host() {
            None => Err(AppError::InvalidUrl("missing host".to_string())),
            Some(Host::Ipv4(ip)) => self.check_addrs(&ip.to_string(), [IpAddr::V4(ip)]).map(|_| None),
            Some(Host::Ipv6(ip)) => self.check_addrs(&ip.to_string(), [IpAddr::V6(ip)]).map(|_| None),
            Some(Host::Domain(domain)) => {
                let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
                if domain.is_empty() {
                    return Err(AppError::InvalidUrl("missing host".to_string()));
                }
                if domain == "localhost" || domain.ends_with(".localhost") {
                    return Err(AppError::InvalidUrl(format!("host is not allowed: {}", domain)));
                }
                Ok(Some(domain))
            }
        }
    }

    pub async fn validate_url(&self, url: &Url) -> Result<()> {
        let Some(domain) = self.check_static(url)? else {
            return Ok(());
        };

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((domain.as_str(), port))
            .await
            .map_err(|e| AppError::InvalidUrl(format!("failed to resolve host {}: {}", domain, e)))?;

        self.check_addrs(&domain, addrs.map(|addr| addr.ip()))
    }

    pub async fn validate(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", raw.trim(), e)))?;
        self.validate_url(&url).await?;
        Ok(url)
    }
}

/// DNS resolver for the HTTP client that refuses private destinations.
struct GuardedResolver {
    guard: UrlGuard,
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let guard = self.guard.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            guard
                .check_addrs(&host, addrs.iter().map(|addr| addr.ip()))
                .map_err(|e| -> Box<dyn StdError + Send + Sync> { e.to_string().into() })?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<Addrs, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}

/// A fetched response body, capped and decoded.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after following redirects.
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

impl FetchedPage {
    /// Fails on 4xx/5xx responses.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(AppError::Enrichment(format!(
                "HTTP error: {}",
                self.status.as_u16()
            )));
        }
        Ok(self)
    }
}

pub struct SafeFetcher {
    client: Client,
    guard: UrlGuard,
    max_body_bytes: usize,
}

impl SafeFetcher {
    #[cfg(test)]
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        Self::with_guard(UrlGuard::new(), timeout, max_body_bytes)
    }

    pub fn with_guard(guard: UrlGuard, timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT_STRING)
            // Redirects are followed by hand so each hop is re-validated
            .redirect(reqwest::redirect::Policy::none())
            .dns_resolver(Arc::new(GuardedResolver {
                guard: guard.clone(),
            }))
            .build()?;

        Ok(Self {
            client,
            guard,
            max_body_bytes,
        })
    }

    pub async fn validate(&self, raw: &str) -> Result<Url> {
        self.guard.validate(raw).await
    }

    /// Fetch an HTML page.
    pub async fn fetch(&self, raw: &str) -> Result<FetchedPage> {
        self.fetch_with_accept(raw, HTML_ACCEPT).await
    }

    pub async fn fetch_with_accept(&self, raw: &str, accept: &str) -> Result<FetchedPage> {
        let mut chain = RedirectChain::new(&self.guard, self.validate(raw).await?);

        loop {
            let response = self
                .client
                .get(chain.current.clone())
                .header(ACCEPT, accept)
                .header("Accept-Language", "en-US,en;q=0.9")
                .send()
                .await?;

            let status = response.status();
            let location = status
                .is_redirection()
                .then(|| response.headers().get(LOCATION))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            if let Some(location) = location {
                chain.follow(&location).await?;
                continue;
            }

            let bytes = read_capped(response, self.max_body_bytes).await?;

            return Ok(FetchedPage {
                url: chain.current,
                status,
                body: sanitize_utf8(&bytes),
            });
        }
    }
}

/// Where a fetch currently points and how many redirects led there.
struct RedirectChain<'a> {
    guard: &'a UrlGuard,
    current: Url,
    hops: usize,
}

impl<'a> RedirectChain<'a> {
    fn new(guard: &'a UrlGuard, start: Url) -> Self {
        Self {
            guard,
            current: start,
            hops: 0,
        }
    }

    /// Move to `location`, resolved against the current URL. The target is re-validated.
    async fn follow(&mut self, location: &str) -> Result<()> {
        if self.hops >= MAX_REDIRECTS {
            return Err(anyhow::anyhow!("stopped after {} redirects", MAX_REDIRECTS).into());
        }
        let next = self
            .current
            .join(location)
            .map_err(|e| AppError::InvalidUrl(format!("bad redirect {}: {}", location, e)))?;
        self.guard.validate_url(&next).await?;
        tracing::debug!("Following redirect {} -> {}", self.current, next);
        self.hops += 1;
        self.current = next;
        Ok(())
    }
}

/// Body bytes kept up to a fixed limit.
struct CappedBody {
    buf: Vec<u8>,
    limit: usize,
}

impl CappedBody {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Returns false once the limit is reached.
    fn push(&mut self, chunk: &[u8]) -> bool {
        let take = chunk.len().min(self.limit - self.buf.len());
        self.buf.extend_from_slice(&chunk[..take]);
        self.buf.len() < self.limit
    }
}

/// Read at most `limit` bytes of the body; the rest is discarded.
async fn read_capped(mut response: Response, limit: usize) -> Result<Vec<u8>> {
    let mut body = CappedBody::new(limit);
    while let Some(chunk) = response.chunk().await? {
        if !body.push(&chunk) {
            break;
        }
    }
    Ok(body.buf)
}
