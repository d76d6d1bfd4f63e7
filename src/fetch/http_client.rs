//! HTTP client with bounded time, size and redirect handling.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client, Response};
use tracing::debug;
use url::Url;

use super::address_guard::{resolve_allowed, BlockedAddress, GuardedResolver};
use super::{check_target, validate_target, FetchError, FetchedResource, PageFetcher};
use crate::config::{Settings, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RESPONSE_BYTES};

const USER_AGENT: &str = "pagevault/0.4 (offline bookmark archiver)";

/// Limits applied to every fetch.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Upper bound on one fetch, including redirects and body download.
    pub timeout: Duration,
    pub max_response_bytes: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Skip the private-network checks. Development and tests only.
    pub allow_private_networks: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: USER_AGENT.to_string(),
            allow_private_networks: false,
        }
    }
}

impl FetcherConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.request_timeout(),
            max_response_bytes: settings.max_response_bytes,
            max_redirects: settings.max_redirects,
            user_agent: settings.user_agent.clone(),
            allow_private_networks: settings.allow_private_networks,
        }
    }
}

/// reqwest-backed fetcher. Redirects are followed by hand so every hop is
/// re-validated against the scheme and address policy.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher.
    pub fn new(config: FetcherConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .gzip(true)
            .brotli(true);

        if !config.allow_private_networks {
            builder = builder.dns_resolver(Arc::new(GuardedResolver));
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    async fn fetch_following_redirects(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let mut current = validate_target(url, self.config.allow_private_networks)?;
        let mut redirects = 0usize;

        loop {
            self.check_hop(&current).await?;

            let start = Instant::now();
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| classify_error(&e))?;
            let status = response.status();

            debug!(
                url = %current,
                status = status.as_u16(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Fetched"
            );

            if status.is_redirection() {
                if let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    if redirects >= self.config.max_redirects {
                        return Err(FetchError::TooManyRedirects(self.config.max_redirects));
                    }
                    redirects += 1;
                    current = current
                        .join(location)
                        .map_err(|e| FetchError::InvalidUrl(format!("{location}: {e}")))?;
                    continue;
                }
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = read_limited(response, self.config.max_response_bytes).await?;

            return Ok(FetchedResource {
                bytes,
                content_type,
                final_url: current,
            });
        }
    }

    /// Scheme and address checks for one hop. Hostnames are resolved up front
    /// so a blocked target is reported as such rather than as a connect error;
    /// the guarded resolver still enforces the same rule at connect time.
    async fn check_hop(&self, url: &Url) -> Result<(), FetchError> {
        check_target(url, self.config.allow_private_networks)?;
        if self.config.allow_private_networks {
            return Ok(());
        }
        if let Some(url::Host::Domain(host)) = url.host() {
            let port = url.port_or_known_default().unwrap_or(80);
            if let Err(e) = resolve_allowed(host, port).await {
                return Err(match e.downcast_ref::<BlockedAddress>() {
                    Some(blocked) => FetchError::ForbiddenAddress(blocked.host.clone()),
                    None => FetchError::Unreachable(e.to_string()),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        match tokio::time::timeout(self.config.timeout, self.fetch_following_redirects(url)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

/// Read the body, failing as soon as it grows past `limit`.
async fn read_limited(mut response: Response, limit: u64) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len > limit {
            return Err(FetchError::TooLarge { limit });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| classify_error(&e))? {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(FetchError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Map a reqwest error onto the fetch taxonomy.
fn classify_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    let mut root = err.to_string();
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<BlockedAddress>() {
            return FetchError::ForbiddenAddress(blocked.host.clone());
        }
        root = inner.to_string();
        source = inner.source();
    }
    FetchError::Unreachable(root)
}
