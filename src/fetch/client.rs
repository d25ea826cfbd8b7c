//! Shared HTTP client with cache, retry, mirror substitution and redirect hooks.
//!
//! Every outbound page or lookup request goes through [`FetchClient::fetch`],
//! which applies, in order:
//!
//! 1. a cache read keyed by the request fingerprint (short-circuits the network),
//! 2. a retry-or-accept decision on the response,
//! 3. mirror substitution plus capped backoff before each retry,
//! 4. a cache write for accepted successful bodies, with canonical-site
//!    redirects normalized while following.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{COOKIE, LOCATION, USER_AGENT};
use reqwest::{Client, ClientBuilder, Proxy, redirect};
use tracing::{debug, instrument, trace, warn};
use url::Url;
use url::form_urlencoded;

use super::error::FetchError;
use super::redirect::{MAX_REDIRECTS, RedirectStep, is_redirect_status, plan_redirect};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_transport_error, is_error_status};
use crate::cache::{CacheStore, RequestDescriptor, Service, fingerprint};
use crate::config::NOT_FOUND_MARKER;
use crate::mirror::MirrorRegistry;
use crate::user_agent;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 30;

/// HTTP method of a [`FetchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST` with an URL-encoded form body.
    Post,
}

impl Method {
    /// Returns the upper-case method name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One logical request, independent of which mirror ends up serving it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: Url,
    form: Vec<(String, String)>,
    service: Option<Service>,
    follow_redirects: bool,
    cacheable: bool,
    cookie: Option<String>,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            form: Vec::new(),
            service: None,
            follow_redirects: true,
            cacheable: true,
            cookie: None,
            user_agent: None,
            headers: Vec::new(),
        }
    }

    /// Creates a `POST` request with an URL-encoded form body.
    #[must_use]
    pub fn post_form<K, V>(url: Url, form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::Post,
            form: form.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Self::get(url)
        }
    }

    /// Declares which service the request targets instead of guessing from the host.
    #[must_use]
    pub fn service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }

    /// Returns the response of the first hop without following redirects.
    #[must_use]
    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    /// Bypasses the cache for this request.
    #[must_use]
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Sends a Cookie header when `cookie` is present and not blank.
    #[must_use]
    pub fn cookie(mut self, cookie: Option<&str>) -> Self {
        self.cookie = cookie
            .filter(|value| !value.trim().is_empty())
            .map(ToString::to_string);
        self
    }

    /// Uses a fixed User-Agent instead of the rotating pool.
    #[must_use]
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = Some(value.into());
        self
    }

    /// Adds an extra header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the URL-encoded form body, if any.
    #[must_use]
    pub fn encoded_form(&self) -> Option<String> {
        if self.form.is_empty() {
            return None;
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.form {
            serializer.append_pair(key, value);
        }
        Some(serializer.finish())
    }

    fn resolved_service(&self) -> Service {
        self.service.unwrap_or_else(|| Service::detect(&self.url))
    }

    /// Like [`Self::resolved_service`], but pool members count as mirrors
    /// whatever their hostname.
    fn service_in(&self, mirrors: &MirrorRegistry) -> Service {
        match self.service {
            Some(service) => service,
            None if mirrors.is_mirror_url(&self.url) => Service::Mirror,
            None => Service::detect(&self.url),
        }
    }
}

/// An accepted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status (200 for cache hits).
    pub status: u16,
    /// URL of the response after redirects.
    pub url: Url,
    /// Response body.
    pub body: String,
    /// `Location` header of an unfollowed redirect.
    pub location: Option<String>,
    /// True when served from the cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true when the body carries the mirror's "not found" marker.
    #[must_use]
    pub fn is_not_found_page(&self) -> bool {
        self.body.contains(NOT_FOUND_MARKER)
    }
}

enum AttemptError {
    Transport(reqwest::Error),
    Redirect,
}

enum LastFailure {
    Status(u16),
    Transport(reqwest::Error),
}

/// The single HTTP client shared by every source and resolver.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    cache: Option<Arc<CacheStore>>,
    mirrors: Arc<MirrorRegistry>,
    retry: RetryPolicy,
}

impl FetchClient {
    /// Creates a client over `mirrors` with no cache and the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] when the HTTP client cannot be built.
    pub fn new(mirrors: Arc<MirrorRegistry>) -> Result<Self, FetchError> {
        Ok(Self {
            http: build_http_client()?,
            cache: None,
            mirrors,
            retry: RetryPolicy::default(),
        })
    }

    /// Attaches (or detaches) the response cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<CacheStore>>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the mirror registry.
    #[must_use]
    pub fn mirrors(&self) -> &MirrorRegistry {
        &self.mirrors
    }

    /// Returns the attached cache.
    #[must_use]
    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_deref()
    }

    /// Performs `request`, retrying and substituting mirrors as needed.
    ///
    /// Accepted responses include successes, non-retryable redirects and the
    /// mirror's terminal "not found" page (with its error status).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] carrying the last status or transport error once
    /// retries are exhausted or the failure is permanent.
    #[instrument(level = "debug", skip(self, request), fields(method = request.method.as_str(), url = %request.url))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let service = request.service_in(&self.mirrors);
        let body = request.encoded_form();
        let key = self.cache.as_ref().filter(|_| request.cacheable).and_then(|_| {
            fingerprint(&RequestDescriptor {
                method: request.method.as_str(),
                url: &request.url,
                body: body.as_deref(),
                service,
            })
        });

        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && let Some(bytes) = cache.read(key)
        {
            debug!(key = %key, "Cache hit");
            return Ok(FetchResponse {
                status: 200,
                url: request.url.clone(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                location: None,
                from_cache: true,
            });
        }

        let mut url = request.url.clone();
        let mut attempt = 1;
        loop {
            let targets_mirror = service == Service::Mirror || self.mirrors.is_mirror_url(&url);
            let (failure_type, failure) = match self.send_following(&request, &url).await {
                Ok(response) if !is_error_status(response.status) => {
                    if targets_mirror {
                        self.mirrors.record_success(&url);
                    }
                    self.store(key.as_deref(), &response);
                    return Ok(response);
                }
                Ok(response) if targets_mirror && response.is_not_found_page() => {
                    debug!(url = %url, status = response.status, "Mirror reports post not found");
                    self.mirrors.record_success(&url);
                    return Ok(response);
                }
                Ok(response) => (
                    self.retry.classify_status(response.status),
                    LastFailure::Status(response.status),
                ),
                Err(AttemptError::Redirect) => return Err(FetchError::redirect(url.as_str())),
                Err(AttemptError::Transport(error)) => (
                    classify_transport_error(&error),
                    LastFailure::Transport(error),
                ),
            };

            match self.retry.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    if targets_mirror {
                        url = self.mirrors.substitute(&url);
                        warn!(url = %url, attempt = next, "Retrying against substitute mirror");
                    } else {
                        warn!(url = %url, attempt = next, "Retrying request");
                    }
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, attempt, reason = %reason, "Giving up");
                    if targets_mirror {
                        self.mirrors.record_failure(&url);
                    }
                    return Err(match failure {
                        LastFailure::Status(status) => {
                            FetchError::http_status(url.as_str(), status, attempt)
                        }
                        LastFailure::Transport(error) if error.is_timeout() => {
                            FetchError::timeout(url.as_str(), attempt)
                        }
                        LastFailure::Transport(error) => {
                            FetchError::network(url.as_str(), attempt, error)
                        }
                    });
                }
            }
        }
    }

    fn store(&self, key: Option<&str>, response: &FetchResponse) {
        if !response.is_success() {
            return;
        }
        if let (Some(cache), Some(key)) = (&self.cache, key)
            && cache.write(key, response.body.as_bytes().to_vec())
        {
            trace!(key, "Cached response");
        }
    }

    async fn send_following(
        &self,
        request: &FetchRequest,
        start: &Url,
    ) -> Result<FetchResponse, AttemptError> {
        let mut current = start.clone();
        let mut method = request.method;
        let mut follow = request.follow_redirects;

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .send_once(request, &current, method)
                .await
                .map_err(AttemptError::Transport)?;
            let status = response.status().as_u16();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string);

            let next = match (&location, follow && is_redirect_status(status)) {
                (Some(location), true) => plan_redirect(&current, status, location),
                _ => None,
            };
            let Some(step) = next else {
                let body = response.text().await.map_err(AttemptError::Transport)?;
                return Ok(FetchResponse {
                    status,
                    url: current,
                    body,
                    location,
                    from_cache: false,
                });
            };

            if matches!(status, 301..=303) && method == Method::Post {
                method = Method::Get;
            }
            current = match step {
                RedirectStep::Follow(target) => target,
                RedirectStep::FollowOnce(target) => {
                    follow = false;
                    target
                }
            };
            trace!(to = %current, status, "Following redirect");
        }
        Err(AttemptError::Redirect)
    }

    async fn send_once(
        &self,
        request: &FetchRequest,
        url: &Url,
        method: Method,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let user_agent = user_agent::user_agent_or_random(request.user_agent.as_deref());
        let mut builder = match method {
            Method::Get => self.http.get(url.clone()),
            Method::Post => self.http.post(url.clone()),
        }
        .header(USER_AGENT, user_agent);

        if method == Method::Post {
            builder = builder.form(&request.form);
        }
        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.send().await
    }
}

/// Builds the underlying reqwest client with redirects disabled.
///
/// Falls back to environment proxies when system proxy discovery panics.
fn build_http_client() -> Result<Client, FetchError> {
    match try_build_client(false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!("HTTP client hit system proxy panic; using env-proxy fallback builder");
            match try_build_client(true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(FetchError::client(
                    "HTTP client construction panicked while initializing networking",
                )),
                Err(BuildClientFailure::Build(error)) => Err(FetchError::client(error.to_string())),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(FetchError::client(error.to_string())),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(disable_system_proxy_lookup: bool) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder();
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder() -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .redirect(redirect::Policy::none())
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mirror::MirrorEndpoint;

    #[test]
    fn test_post_form_encodes_body_for_fingerprinting() {
        let request = FetchRequest::post_form(
            Url::parse("https://www.savetweetvid.com/downloader").unwrap(),
            [("url", "https://twitter.com/a/status/1")],
        );
        assert_eq!(request.method(), Method::Post);
        assert_eq!(
            request.encoded_form().as_deref(),
            Some("url=https%3A%2F%2Ftwitter.com%2Fa%2Fstatus%2F1")
        );
        assert_eq!(request.resolved_service(), Service::VideoLookup);
    }

    #[test]
    fn test_get_has_no_body() {
        let request = FetchRequest::get(Url::parse("https://nitter.it/a").unwrap());
        assert_eq!(request.encoded_form(), None);
    }

    #[test]
    fn test_blank_cookie_dropped() {
        let request =
            FetchRequest::get(Url::parse("https://twitter.com/").unwrap()).cookie(Some(" "));
        assert_eq!(request.cookie, None);
    }

    #[test]
    fn test_explicit_service_overrides_detection() {
        let request = FetchRequest::get(Url::parse("http://127.0.0.1:9/a/status/1").unwrap())
            .service(Service::Mirror);
        assert_eq!(request.resolved_service(), Service::Mirror);
    }

    #[test]
    fn test_pool_member_detected_as_mirror() {
        let mirrors =
            MirrorRegistry::new(vec![MirrorEndpoint::parse("http://127.0.0.1:9").unwrap()]).unwrap();
        let request = FetchRequest::get(Url::parse("http://127.0.0.1:9/a/status/1").unwrap());
        assert_eq!(request.resolved_service(), Service::Other);
        assert_eq!(request.service_in(&mirrors), Service::Mirror);

        let request = FetchRequest::get(Url::parse("https://t.co/abc").unwrap());
        assert_eq!(request.service_in(&mirrors), Service::Canonical);
    }

    #[test]
    fn test_not_found_page_detection() {
        let response = FetchResponse {
            status: 404,
            url: Url::parse("https://nitter.it/a/status/1").unwrap(),
            body: "<div class=\"error-panel\"><span>Tweet not found</span></div>".to_string(),
            location: None,
            from_cache: false,
        };
        assert!(response.is_not_found_page());
        assert!(!response.is_success());
    }

    #[test]
    fn test_client_builds() {
        let mirrors = Arc::new(MirrorRegistry::with_defaults().unwrap());
        assert!(FetchClient::new(mirrors).is_ok());
    }
}
