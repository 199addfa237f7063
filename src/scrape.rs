use core::time::Duration;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::{Rng, seq::IndexedRandom};
use reqwest::{
    Client, Proxy, Response, StatusCode,
    header::{CONTENT_TYPE, RETRY_AFTER},
};
use tokio::time::sleep;
use url::Url;

use crate::{cache::TtlCache, config::Config, util::parse_retry_after};

pub mod puppeteer;

pub static USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub fn basic(proxy: Option<&str>, timeout: Duration) -> reqwest::Result<Client> {
    let user_agent = random_user_agent();
    tracing::debug!(target: "client", "choosing user-agent \x1b[1;36m{user_agent}\x1b[0m");

    let mut builder = Client::builder()
        .connect_timeout(const { Duration::from_secs(8) })
        .timeout(timeout)
        .user_agent(user_agent);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(StatusCode),
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("render: {0}")]
    Render(String),
}

impl FetchError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Status(code) => {
                code.is_server_error()
                    || *code == StatusCode::TOO_MANY_REQUESTS
                    || *code == StatusCode::REQUEST_TIMEOUT
            }
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Rejected(_) => false,
            Self::Render(_) => true,
        }
    }
}

/// Exponential backoff: attempt `n` (0-based) waits `min(cap, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total tries, the first one included.
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.cap)
    }

    /// [`Self::delay`] plus up to a quarter of it in random jitter.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let d = self.delay(attempt);
        let spread = (d.as_millis() / 4) as u64;
        if spread == 0 {
            return d;
        }
        d + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

/// Token bucket shared by every request of a run.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    /// `rate` tokens per second; zero, negative or non-finite rates disable limiting.
    pub fn new(rate: f64) -> Self {
        let burst = rate.max(1.0);
        Self {
            rate,
            burst,
            state: Mutex::new((burst, Instant::now())),
        }
    }

    fn enabled(&self) -> bool {
        self.rate.is_finite() && self.rate > 0.0
    }

    /// Takes one token and returns how long the caller must wait for it.
    pub fn reserve(&self) -> Duration {
        if !self.enabled() {
            return Duration::ZERO;
        }
        let mut guard = self.state.lock();
        let (ref mut tokens, ref mut last) = *guard;
        let now = Instant::now();
        *tokens = (*tokens + now.duration_since(*last).as_secs_f64() * self.rate).min(self.burst);
        *last = now;
        *tokens -= 1.0;
        if *tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-*tokens / self.rate)
        }
    }

    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tracing::trace!(target: "ratelimit", "waiting {wait:?}");
            sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Payload {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

pub struct Fetcher {
    client: Client,
    backoff: Backoff,
    limiter: RateLimiter,
    pages: TtlCache<String, Page>,
}

impl Fetcher {
    pub fn new(client: Client, backoff: Backoff, rate: f64, cache_ttl: Duration) -> Self {
        Self {
            client,
            backoff,
            limiter: RateLimiter::new(rate),
            pages: TtlCache::new(cache_ttl),
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = basic(config.proxy.as_deref(), config.timeout)?;
        Ok(Self::new(client, config.backoff, config.rate, config.cache_ttl))
    }

    pub const fn client(&self) -> &Client {
        &self.client
    }

    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// GET with rate limiting and retries; only 2xx responses come back as `Ok`.
    async fn get(&self, url: &Url) -> Result<Response, FetchError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            let (err, hint) = match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let hint = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| parse_retry_after(v, SystemTime::now()));
                    (FetchError::Status(resp.status()), hint)
                }
                Err(e) => (FetchError::Network(e), None),
            };

            attempt += 1;
            if !err.is_retriable() || attempt >= self.backoff.attempts {
                return Err(err);
            }
            let wait = hint.map_or_else(
                || self.backoff.jittered(attempt - 1),
                |h| h.min(self.backoff.cap),
            );
            tracing::warn!(target: "fetch", "{url}: {err}, retry #{attempt} in {wait:?}");
            sleep(wait).await;
        }
    }

    pub async fn page(&self, url: &Url) -> Result<Page, FetchError> {
        if let Some(page) = self.pages.get(&url.as_str().to_owned()) {
            tracing::debug!(target: "fetch", "cache hit {url}");
            return Ok(page);
        }

        let resp = self.get(url).await?;
        let page = Page {
            url: resp.url().clone(),
            body: resp.text().await?,
        };
        tracing::info!(target: "fetch", "{url}: {} bytes", page.body.len());
        self.pages.insert(url.as_str().to_owned(), page.clone());
        Ok(page)
    }

    pub async fn bytes(&self, url: &Url) -> Result<Payload, FetchError> {
        let resp = self.get(url).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        Ok(Payload {
            content_type,
            bytes: resp.bytes().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let b = Backoff::default();
        assert_eq!(b.delay(0), Duration::from_millis(500));
        assert_eq!(b.delay(1), Duration::from_millis(1000));
        assert_eq!(b.delay(3), Duration::from_millis(4000));
        assert_eq!(b.delay(4), b.cap);
        assert_eq!(b.delay(40), b.cap);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let b = Backoff::default();
        for _ in 0..32 {
            let d = b.jittered(1);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn retriable_statuses() {
        assert!(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE).is_retriable());
        assert!(FetchError::Status(StatusCode::TOO_MANY_REQUESTS).is_retriable());
        assert!(!FetchError::Status(StatusCode::NOT_FOUND).is_retriable());
        assert!(!FetchError::Rejected("too small".into()).is_retriable());
    }

    #[test]
    fn bucket_allows_burst_then_spaces_requests() {
        let limiter = RateLimiter::new(2.0);
        assert_eq!(limiter.reserve(), Duration::ZERO);
        assert_eq!(limiter.reserve(), Duration::ZERO);
        let wait = limiter.reserve();
        assert!(wait > Duration::from_millis(400) && wait <= Duration::from_millis(500));
    }

    #[test]
    fn disabled_bucket_never_waits() {
        let limiter = RateLimiter::new(0.0);
        for _ in 0..10 {
            assert_eq!(limiter.reserve(), Duration::ZERO);
        }
    }

    #[test]
    fn user_agent_comes_from_the_pool() {
        assert!(USER_AGENTS.contains(&random_user_agent()));
    }
}
