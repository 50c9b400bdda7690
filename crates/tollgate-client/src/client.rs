//! Main client implementation.
//!
//! Every request goes through the same pipeline:
//!
//! 1. **Pre-flight**: read the stored tokens. If the access token is
//!    expired (or about to be), refresh it first, unless the refresh token
//!    is dead too, in which case the session ends without a refresh call.
//! 2. **Dispatch**: send with `Authorization: Bearer <access>`.
//! 3. **Post-flight**: if a detector says the token was rejected, refresh
//!    and replay the request once. A replayed request that is rejected again
//!    ends the session.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::detect::{ExpiryDetector, SharedDetector, default_detectors};
use crate::error::{Error, Result};
use crate::expiry::ExpiryOracle;
use crate::refresh::{HttpRefresher, RefreshCoordinator, RefreshPolicy, Refresher};
use crate::response::ApiResponse;
use crate::session::{SessionState, SessionTerminator, TerminationReason};
use crate::store::{Scope, TokenPair, TokenStore};

/// Authenticated API client.
///
/// Cheap to clone; clones share tokens, the refresh flight and the session.
///
/// # Example
///
/// ```no_run
/// use tollgate_client::{Scope, TollgateClient};
///
/// # async fn example() -> tollgate_client::Result<()> {
/// let client = TollgateClient::builder()
///     .base_url("http://localhost:8080")
///     .build()?;
///
/// client
///     .login("auth/login", &serde_json::json!({"email": "a@b.c", "password": "pw"}), Scope::Durable)
///     .await?;
///
/// let leads: serde_json::Value = client.get("leads").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TollgateClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    store: Arc<TokenStore>,
    oracle: ExpiryOracle,
    coordinator: RefreshCoordinator,
    terminator: Arc<SessionTerminator>,
    detectors: Vec<SharedDetector>,
}

impl std::fmt::Debug for TollgateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TollgateClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("oracle", &self.inner.oracle)
            .field("coordinator", &self.inner.coordinator)
            .field("detectors", &self.inner.detectors.len())
            .finish()
    }
}

impl TollgateClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client straight from configuration.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }

    pub fn oracle(&self) -> &ExpiryOracle {
        &self.inner.oracle
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.terminator.state()
    }

    /// Watch for session transitions (e.g. to route the user to login).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.terminator.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Post credentials to `path` and store the returned token pair.
    ///
    /// The login request itself bypasses the token pipeline.
    pub async fn login<B>(&self, path: &str, credentials: &B, scope: Scope) -> Result<TokenPair>
    where
        B: Serialize + ?Sized,
    {
        let mut request = ApiRequest::new(Method::POST, path);
        request.set_json(credentials)?;
        let response = self.dispatch(&request, None).await?;
        let pair: TokenPair = response.into_result()?;

        self.set_tokens(&pair, scope)?;
        tracing::info!(?scope, "logged in");
        Ok(pair)
    }

    /// Store an externally obtained token pair and re-arm the session.
    pub fn set_tokens(&self, pair: &TokenPair, scope: Scope) -> Result<()> {
        self.inner.store.set(pair, scope)?;
        self.inner.terminator.arm();
        Ok(())
    }

    /// Drop all stored tokens and signal `Terminated(Logout)`.
    pub fn logout(&self) -> Result<()> {
        if !self.inner.terminator.terminate(TerminationReason::Logout) {
            // Already terminated; the stores should be empty, make sure.
            self.inner.store.clear()?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Start building a request to `path` (relative to the base URL).
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            request: ApiRequest::new(method, path),
            error: None,
        }
    }

    /// GET and decode.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path).send().await?.into_result()
    }

    /// POST a JSON body and decode.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path)
            .json(body)
            .send()
            .await?
            .into_result()
    }

    /// PUT a JSON body and decode.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path)
            .json(body)
            .send()
            .await?
            .into_result()
    }

    /// PATCH a JSON body and decode.
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path)
            .json(body)
            .send()
            .await?
            .into_result()
    }

    /// DELETE, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, path)
            .send()
            .await?
            .into_result::<serde_json::Value>()
            .map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner.base_url.join(path).map_err(Error::from)
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let span = tracing::debug_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );
        self.run_pipeline(request).instrument(span).await
    }

    async fn run_pipeline(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let mut token = self.preflight().await?;

        loop {
            let response = self.dispatch(&request, token.as_deref()).await?;
            if !self.signals_expiry(&response) {
                return Ok(response);
            }

            if request.retried {
                tracing::warn!(status = %response.status(), "replayed request rejected again");
                return Err(self.end_session(TerminationReason::RetryRejected));
            }

            tracing::debug!(status = %response.status(), "token rejected by server, refreshing");
            token = Some(self.refresh_for_retry(token.as_deref()).await?);
            request.retried = true;
        }
    }

    /// Decide which bearer token to send, refreshing first if needed.
    async fn preflight(&self) -> Result<Option<String>> {
        let tokens = self.inner.store.get()?;
        if tokens.is_empty() {
            tracing::debug!("no stored tokens, sending unauthenticated");
            return Ok(None);
        }

        let oracle = &self.inner.oracle;
        if !oracle.is_expired(tokens.access_token.as_deref()) {
            return Ok(tokens.access_token);
        }

        if oracle.is_expired(tokens.refresh_token.as_deref()) {
            let reason = if tokens.refresh_token.is_some() {
                TerminationReason::BothTokensExpired
            } else {
                TerminationReason::MissingRefreshToken
            };
            tracing::info!(%reason, "cannot refresh before sending");
            return Err(self.end_session(reason));
        }

        tracing::debug!("access token expired, refreshing before sending");
        Ok(Some(self.inner.coordinator.refresh().await?))
    }

    /// A token to replay with after `sent` was rejected.
    ///
    /// If another request already replaced `sent` with a still-valid token,
    /// that token is reused instead of refreshing again.
    async fn refresh_for_retry(&self, sent: Option<&str>) -> Result<String> {
        let tokens = self.inner.store.get()?;
        if tokens.refresh_token.is_none() {
            return Err(self.end_session(TerminationReason::MissingRefreshToken));
        }

        if let Some(current) = tokens.access_token
            && Some(current.as_str()) != sent
            && !self.inner.oracle.is_expired(Some(&current))
        {
            tracing::debug!("token already refreshed by another request, replaying");
            return Ok(current);
        }

        Ok(self.inner.coordinator.refresh().await?)
    }

    fn end_session(&self, reason: TerminationReason) -> Error {
        self.inner.terminator.terminate(reason);
        Error::SessionExpired(reason)
    }

    fn signals_expiry(&self, response: &ApiResponse) -> bool {
        self.inner.detectors.iter().any(|d| d.is_expired(response))
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse> {
        let url = self.url(&request.path)?;

        let mut headers = request.headers.clone();
        if token.is_some() {
            headers.remove(AUTHORIZATION);
        }

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url)
            .headers(headers)
            .timeout(self.inner.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let response = ApiResponse::from_reqwest(response).await?;
        tracing::debug!(status = %response.status(), retried = request.retried, "response received");
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A replayable request.
#[derive(Debug, Clone)]
struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
    /// Set once the request has been replayed after a refresh.
    retried: bool,
}

impl ApiRequest {
    fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    fn set_json<B: Serialize + ?Sized>(&mut self, body: &B) -> Result<()> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(())
    }
}

/// Builder for one request through the token pipeline.
#[derive(Debug)]
pub struct RequestBuilder {
    client: TollgateClient,
    request: ApiRequest,
    error: Option<Error>,
}

impl RequestBuilder {
    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((key.into(), value.into()));
        self
    }

    /// Set a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    /// Set a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Self {
        if self.error.is_none()
            && let Err(e) = self.request.set_json(body)
        {
            self.error = Some(e);
        }
        self
    }

    /// Set a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Send the request, refreshing and replaying as needed.
    pub async fn send(self) -> Result<ApiResponse> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.client.execute(self.request).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a [`TollgateClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    store: Option<Arc<TokenStore>>,
    refresher: Option<Arc<dyn Refresher>>,
    detectors: Option<Vec<SharedDetector>>,
    user_agent: Option<String>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("refresher", &self.refresher)
            .field("detectors", &self.detectors.as_ref().map(Vec::len))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            store: None,
            refresher: None,
            detectors: None,
            user_agent: None,
        }
    }

    /// Start from a loaded configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base URL for the API.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Set the expiry safety margin.
    pub fn safety_margin(mut self, margin: Duration) -> Self {
        self.config = self.config.with_safety_margin(margin);
        self
    }

    /// Use this token store instead of the configured one.
    pub fn token_store(mut self, store: impl Into<Arc<TokenStore>>) -> Self {
        self.store = Some(store.into());
        self
    }

    /// Use this refresher instead of posting to the refresh endpoint.
    pub fn refresher(mut self, refresher: impl Refresher + 'static) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    /// Replace the configured detectors.
    pub fn detectors(mut self, detectors: Vec<SharedDetector>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    /// Add a detector on top of the configured ones.
    pub fn detector(mut self, detector: impl ExpiryDetector + 'static) -> Self {
        let auth = &self.config.auth;
        self.detectors
            .get_or_insert_with(|| default_detectors(auth))
            .push(Arc::new(detector));
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<TollgateClient> {
        self.config.validate()?;

        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        // Parse and normalize base URL
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("tollgate-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        let store = match self.store {
            Some(store) => store,
            None => {
                let dir = self.config.storage.resolve_dir().ok_or_else(|| {
                    Error::Config("could not determine a token storage directory".to_string())
                })?;
                Arc::new(TokenStore::with_data_dir(&dir))
            }
        };

        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => {
                let path = self.config.auth.refresh_path.trim_start_matches('/');
                let url = base_url.join(path)?;
                Arc::new(HttpRefresher::new(http.clone(), url))
            }
        };

        let terminator = Arc::new(SessionTerminator::new(store.clone()));
        let coordinator = RefreshCoordinator::new(
            refresher,
            store.clone(),
            terminator.clone(),
            RefreshPolicy {
                timeout: self.config.refresh_timeout(),
                max_pending: self.config.auth.max_pending,
            },
        );

        let detectors = self
            .detectors
            .unwrap_or_else(|| default_detectors(&self.config.auth));

        Ok(TollgateClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                timeout: self.config.request_timeout(),
                store,
                oracle: ExpiryOracle::new(self.config.safety_margin()),
                coordinator,
                terminator,
                detectors,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
