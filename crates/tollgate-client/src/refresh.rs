//! Single-flight token refresh.
//!
//! However many requests discover an expired token at once, only one refresh
//! call is made. The first caller starts it on a detached task; every caller
//! (the first one included) parks on a one-shot in a FIFO queue, and the
//! task hands the same outcome to all of them when the call settles.
//!
//! Because the call runs on its own task, a caller dropping its future does
//! not cancel the refresh.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;

use crate::config::{DEFAULT_MAX_PENDING, DEFAULT_REFRESH_TIMEOUT};
use crate::error::RefreshError;
use crate::response::Outcome;
use crate::session::{SessionTerminator, TerminationReason};
use crate::store::TokenStore;

// ============================================================================
// Refresher Trait
// ============================================================================

/// Tokens returned by the refresh endpoint.
///
/// Some endpoints only rotate the access token; `refresh_token` is `None`
/// then.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[redacted]")
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Exchanges a refresh token for new tokens.
#[async_trait]
pub trait Refresher: Send + Sync + fmt::Debug {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// `POST {url}` with `{"refreshToken": …}`.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    http: reqwest::Client,
    url: Url,
}

impl HttpRefresher {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        let outcome = Outcome::<RefreshedTokens>::decode(status, &body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        match outcome {
            Outcome::Ok(tokens) => Ok(tokens),
            Outcome::Unauthorized => Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: "refresh token rejected".to_string(),
            }),
            Outcome::ServerError { status, detail } => Err(RefreshError::Rejected {
                status,
                message: detail,
            }),
        }
    }
}

// ============================================================================
// RefreshCoordinator
// ============================================================================

/// Timeout and queue bound for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Upper bound on one refresh call.
    pub timeout: Duration,
    /// Maximum number of parked callers; the oldest is rejected on overflow.
    pub max_pending: usize,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REFRESH_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

#[derive(Default)]
struct Flight {
    refreshing: bool,
    waiters: VecDeque<Waiter>,
}

/// Serializes refreshes: at most one refresh call is outstanding.
///
/// Cheap to clone; clones share the same flight.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    refresher: Arc<dyn Refresher>,
    store: Arc<TokenStore>,
    terminator: Arc<SessionTerminator>,
    policy: RefreshPolicy,
    flight: Mutex<Flight>,
    calls: AtomicU64,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresher", &self.inner.refresher)
            .field("policy", &self.inner.policy)
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn Refresher>,
        store: Arc<TokenStore>,
        terminator: Arc<SessionTerminator>,
        policy: RefreshPolicy,
    ) -> Self {
        let policy = RefreshPolicy {
            max_pending: policy.max_pending.max(1),
            ..policy
        };
        Self {
            inner: Arc::new(CoordinatorInner {
                refresher,
                store,
                terminator,
                policy,
                flight: Mutex::new(Flight::default()),
                calls: AtomicU64::new(0),
            }),
        }
    }

    /// Get a fresh access token, joining the in-flight refresh if there is
    /// one.
    ///
    /// On failure the session has already been terminated when this returns.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut flight = self.inner.flight.lock();
            if flight.waiters.len() >= self.inner.policy.max_pending
                && let Some(oldest) = flight.waiters.pop_front()
            {
                tracing::warn!(
                    max_pending = self.inner.policy.max_pending,
                    "refresh queue full, rejecting oldest waiter"
                );
                let _ = oldest.send(Err(RefreshError::QueueOverflow));
            }
            flight.waiters.push_back(tx);
            !std::mem::replace(&mut flight.refreshing, true)
        };

        if leader {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run().await });
        } else {
            tracing::debug!("refresh already in flight, waiting for it");
        }

        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    /// Whether a refresh call is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.inner.flight.lock().refreshing
    }

    /// Number of callers parked behind the current refresh.
    pub fn pending(&self) -> usize {
        self.inner.flight.lock().waiters.len()
    }

    /// Number of refresh calls made so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

/// Settles the flight if the refresh task unwinds before doing so itself.
struct SettleOnDrop<'a> {
    inner: &'a CoordinatorInner,
    settled: bool,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.settle(Err(RefreshError::Abandoned));
        }
    }
}

impl CoordinatorInner {
    async fn run(&self) {
        let mut guard = SettleOnDrop {
            inner: self,
            settled: false,
        };

        tracing::info!("refreshing access token");
        let outcome = self.perform().await;

        match &outcome {
            Ok(_) => tracing::info!("access token refreshed"),
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                self.terminator.terminate(TerminationReason::RefreshFailed);
            }
        }

        self.settle(outcome);
        guard.settled = true;
    }

    async fn perform(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .store
            .get()?
            .refresh_token
            .ok_or(RefreshError::MissingRefreshToken)?;

        self.calls.fetch_add(1, Ordering::SeqCst);
        let timeout = self.policy.timeout;
        let tokens = tokio::time::timeout(timeout, self.refresher.refresh(&refresh_token))
            .await
            .map_err(|_| RefreshError::Timeout(timeout))??;

        if self.terminator.is_terminated() {
            return Err(RefreshError::SessionEnded);
        }

        let rotated = tokens.refresh_token.as_deref().filter(|t| !t.is_empty());
        self.store.update(&tokens.access_token, rotated)?;

        // Terminated between the check and the write: undo the write.
        if self.terminator.is_terminated() {
            self.store.clear()?;
            return Err(RefreshError::SessionEnded);
        }

        Ok(tokens.access_token)
    }

    /// Hand `outcome` to every waiter in FIFO order, then go idle.
    fn settle(&self, outcome: Result<String, RefreshError>) {
        let mut flight = self.flight.lock();
        let waiters = flight.waiters.len();
        for waiter in flight.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
        flight.refreshing = false;
        tracing::debug!(waiters, ok = outcome.is_ok(), "refresh settled");
    }
}
