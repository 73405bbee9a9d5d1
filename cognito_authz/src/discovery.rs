//! OpenID Connect discovery and signing key cache
//!
//! The identity provider publishes its metadata at
//! `{issuer}/.well-known/openid-configuration`, which points at the JSON Web
//! Key Set used to sign tokens. [`DiscoveryCache`] fetches both, holds the
//! result as an immutable [`DiscoveryDocument`] snapshot, and replaces that
//! snapshot wholesale on refresh. Readers that already hold a snapshot are
//! never affected by a concurrent refresh.
//!
//! Concurrent refreshes are collapsed: while one fetch is outstanding, other
//! callers wait for it and share its outcome, whether success or failure.
//!
//! Refreshes are also spaced out in time. Forced refreshes closer together
//! than [`CacheOptions::min_refresh_interval`] reuse the cached document, and
//! after a failed fetch no new attempt is made until that interval elapses.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use cognito_authz_clock::{Clock, System, UnixTime};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    claims::{Issuer, IssuerRef},
    error::DiscoveryError,
    jwk::{Jwks, KeyIdRef, SigningKey},
};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The parts of the OpenID provider metadata used to locate signing keys
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OpenIdConfiguration {
    /// The issuer the provider claims to be
    #[serde(default)]
    pub issuer: Option<String>,

    /// The location of the provider's JSON Web Key Set
    pub jwks_uri: String,
}

/// A consistent snapshot of the provider's metadata and signing keys
#[derive(Clone, Debug)]
pub struct DiscoveryDocument {
    issuer: Issuer,
    jwks_uri: String,
    keys: Jwks,
    fetched_at: UnixTime,
    ttl: Duration,
}

impl DiscoveryDocument {
    /// The issuer this document was fetched for
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// Where the keys were fetched from
    #[must_use]
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// The signing keys
    #[must_use]
    pub fn keys(&self) -> &Jwks {
        &self.keys
    }

    /// Finds the signing key with the given ID
    #[must_use]
    pub fn key(&self, kid: &KeyIdRef) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    /// When the document was fetched
    #[must_use]
    pub fn fetched_at(&self) -> UnixTime {
        self.fetched_at
    }

    /// How long the document is considered fresh
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the document is still within its freshness window at `now`
    #[must_use]
    pub fn is_fresh(&self, now: UnixTime) -> bool {
        now < self.fetched_at.saturating_add(self.ttl)
    }
}

/// A source of provider metadata and key sets
///
/// The cache never talks to the network directly, which lets tests count and
/// shape fetches.
#[async_trait]
pub trait MetadataFetcher: fmt::Debug + Send + Sync {
    /// Fetches the OpenID provider configuration document
    async fn fetch_configuration(&self, url: &str)
        -> Result<OpenIdConfiguration, DiscoveryError>;

    /// Fetches a JSON Web Key Set
    async fn fetch_key_set(&self, url: &str) -> Result<Jwks, DiscoveryError>;
}

/// Fetches metadata over HTTP(S)
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Constructs a fetcher whose requests each time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cognito_authz/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DiscoveryError> {
        let request_error = |err: reqwest::Error| {
            if err.is_timeout() {
                DiscoveryError::Timeout {
                    url: url.to_owned(),
                    timeout: self.timeout,
                }
            } else if err.is_decode() {
                DiscoveryError::InvalidDocument {
                    url: url.to_owned(),
                    message: err.to_string(),
                }
            } else {
                DiscoveryError::Request {
                    url: url.to_owned(),
                    message: err.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(request_error)
    }
}

#[async_trait]
impl MetadataFetcher for HttpFetcher {
    async fn fetch_configuration(
        &self,
        url: &str,
    ) -> Result<OpenIdConfiguration, DiscoveryError> {
        self.get_json(url).await
    }

    async fn fetch_key_set(&self, url: &str) -> Result<Jwks, DiscoveryError> {
        self.get_json(url).await
    }
}

/// Tuning for the discovery cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct CacheOptions {
    ttl: Duration,
    fetch_timeout: Duration,
    min_refresh_interval: Duration,
}

impl Default for CacheOptions {
    /// One hour freshness, ten second fetch timeout, thirty seconds between
    /// forced or failed refreshes
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(10),
            min_refresh_interval: Duration::from_secs(30),
        }
    }
}

impl CacheOptions {
    /// Sets how long a fetched document stays fresh
    pub fn with_ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Bounds the time a complete refresh (metadata and keys) may take
    pub fn with_fetch_timeout(self, fetch_timeout: Duration) -> Self {
        Self {
            fetch_timeout,
            ..self
        }
    }

    /// Sets the minimum spacing between forced refreshes, which is also the
    /// backoff after a failed refresh
    ///
    /// A zero interval disables both.
    pub fn with_min_refresh_interval(self, min_refresh_interval: Duration) -> Self {
        Self {
            min_refresh_interval,
            ..self
        }
    }

    /// The freshness window
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The refresh time limit
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// The refresh spacing
    #[must_use]
    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshMode {
    IfStale,
    Force,
}

type FetchOutcome = Result<Arc<DiscoveryDocument>, DiscoveryError>;

/// Refresh bookkeeping, guarded by the single-flight lock
#[derive(Debug, Default)]
struct Flight {
    outcome: Option<FetchOutcome>,
    last_forced: Option<UnixTime>,
    retry_after: Option<UnixTime>,
}

#[derive(Debug)]
struct Inner {
    issuer: Issuer,
    discovery_url: String,
    options: CacheOptions,
    fetcher: Arc<dyn MetadataFetcher>,
    clock: Arc<dyn Clock>,
    snapshot: ArcSwapOption<DiscoveryDocument>,
    flight: tokio::sync::Mutex<Flight>,
    completed: AtomicU64,
}

/// A shared, single-flight cache of the provider's discovery document
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone, Debug)]
pub struct DiscoveryCache {
    inner: Arc<Inner>,
}

impl DiscoveryCache {
    /// Constructs a cache for `issuer` backed by the given fetcher and clock
    pub fn new(
        issuer: Issuer,
        fetcher: Arc<dyn MetadataFetcher>,
        clock: Arc<dyn Clock>,
        options: CacheOptions,
    ) -> Self {
        let discovery_url = format!("{}{WELL_KNOWN_PATH}", issuer.as_str().trim_end_matches('/'));

        Self {
            inner: Arc::new(Inner {
                issuer,
                discovery_url,
                options,
                fetcher,
                clock,
                snapshot: ArcSwapOption::empty(),
                flight: tokio::sync::Mutex::new(Flight::default()),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Constructs a cache that fetches over HTTP and uses the system clock
    pub fn over_http(issuer: Issuer, options: CacheOptions) -> Result<Self, reqwest::Error> {
        let fetcher = HttpFetcher::new(options.fetch_timeout)?;
        Ok(Self::new(
            issuer,
            Arc::new(fetcher),
            Arc::new(System),
            options,
        ))
    }

    /// The issuer whose metadata is cached
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.inner.issuer
    }

    /// The URL of the discovery document
    #[must_use]
    pub fn discovery_url(&self) -> &str {
        &self.inner.discovery_url
    }

    /// The clock used to judge freshness
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// The latest snapshot, without fetching
    #[must_use]
    pub fn current(&self) -> Option<Arc<DiscoveryDocument>> {
        self.inner.snapshot.load_full()
    }

    /// Gets a fresh document, fetching if the cache is empty or stale
    ///
    /// If a refresh fails but an older document exists, the older document is
    /// returned and remains in place until a refresh succeeds.
    pub async fn get(&self) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        if let Some(doc) = self.current() {
            if doc.is_fresh(self.inner.clock.now()) {
                return Ok(doc);
            }
        }

        match self.refresh(RefreshMode::IfStale).await {
            Ok(doc) => Ok(doc),
            Err(err) => match self.current() {
                Some(stale) => {
                    tracing::warn!(
                        issuer = %self.inner.issuer,
                        fetched_at = %stale.fetched_at(),
                        "serving stale discovery document",
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Fetches a new document regardless of freshness
    ///
    /// On failure the existing document, if any, is left in place. Within
    /// [`CacheOptions::min_refresh_interval`] of the previous forced refresh,
    /// the cached document is returned without fetching.
    pub async fn force_refresh(&self) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        self.refresh(RefreshMode::Force).await
    }

    #[tracing::instrument(skip(self), fields(issuer = %self.inner.issuer))]
    async fn refresh(&self, mode: RefreshMode) -> FetchOutcome {
        let seen = self.inner.completed.load(Ordering::Acquire);
        let mut flight = self.inner.flight.lock().await;

        // Another caller finished a fetch while this one waited
        if self.inner.completed.load(Ordering::Acquire) != seen {
            if let Some(outcome) = flight.outcome.as_ref() {
                tracing::trace!("sharing outcome of concurrent refresh");
                return outcome.clone();
            }
        }

        if mode == RefreshMode::IfStale {
            if let Some(doc) = self.current() {
                if doc.is_fresh(self.inner.clock.now()) {
                    return Ok(doc);
                }
            }
        }

        let now = self.inner.clock.now();
        let interval = self.inner.options.min_refresh_interval;

        if let (Some(retry_after), Some(Err(err))) = (flight.retry_after, &flight.outcome) {
            if now < retry_after {
                tracing::debug!(%retry_after, "refresh backing off after failure");
                return Err(err.clone());
            }
        }

        if mode == RefreshMode::Force {
            if let (Some(last), Some(doc)) = (flight.last_forced, self.current()) {
                if now < last.saturating_add(interval) {
                    tracing::warn!(
                        since_last_secs = now.since(last).as_secs(),
                        "forced refresh rate limited, using cached document",
                    );
                    return Ok(doc);
                }
            }
            flight.last_forced = Some(now);
        }

        let timeout = self.inner.options.fetch_timeout;
        let outcome = match tokio::time::timeout(timeout, self.fetch()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DiscoveryError::Timeout {
                url: self.inner.discovery_url.clone(),
                timeout,
            }),
        };

        match &outcome {
            Ok(doc) => {
                self.inner.snapshot.store(Some(Arc::clone(doc)));
                flight.retry_after = None;
                tracing::info!(
                    jwks.url = %doc.jwks_uri(),
                    jwks.keys = doc.keys().len(),
                    "JWKS refreshed",
                );
            }
            Err(err) => {
                let retry_after = self.inner.clock.now().saturating_add(interval);
                flight.retry_after = Some(retry_after);
                tracing::warn!(error = %err, %retry_after, "discovery refresh failed");
            }
        }

        flight.outcome = Some(outcome.clone());
        self.inner.completed.fetch_add(1, Ordering::Release);

        outcome
    }

    async fn fetch(&self) -> FetchOutcome {
        let inner = &*self.inner;

        tracing::debug!(url = %inner.discovery_url, "fetching discovery document");
        let config = inner
            .fetcher
            .fetch_configuration(&inner.discovery_url)
            .await?;

        if let Some(found) = &config.issuer {
            if found.trim_end_matches('/') != inner.issuer.as_str().trim_end_matches('/') {
                return Err(DiscoveryError::IssuerMismatch {
                    expected: inner.issuer.to_string(),
                    found: found.clone(),
                });
            }
        }

        tracing::debug!(url = %config.jwks_uri, "fetching JWKS");
        let keys = inner.fetcher.fetch_key_set(&config.jwks_uri).await?;
        if keys.is_empty() {
            return Err(DiscoveryError::EmptyKeySet {
                url: config.jwks_uri,
            });
        }

        Ok(Arc::new(DiscoveryDocument {
            issuer: inner.issuer.clone(),
            jwks_uri: config.jwks_uri,
            keys,
            fetched_at: inner.clock.now(),
            ttl: inner.options.ttl,
        }))
    }
}
