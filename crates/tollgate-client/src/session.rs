//! Session termination.
//!
//! When no refresh is possible the session ends: stored tokens are wiped and
//! the host application is told, through a watch channel, to send the user
//! back to login.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::store::TokenStore;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Access and refresh token were both expired before sending.
    BothTokensExpired,
    /// A refresh was needed but no refresh token is stored.
    MissingRefreshToken,
    /// The refresh call failed.
    RefreshFailed,
    /// A request replayed after a refresh was rejected again.
    RetryRejected,
    /// The user logged out.
    Logout,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::BothTokensExpired => "access and refresh tokens expired",
            TerminationReason::MissingRefreshToken => "no refresh token",
            TerminationReason::RefreshFailed => "token refresh failed",
            TerminationReason::RetryRejected => "request rejected after refresh",
            TerminationReason::Logout => "logged out",
        };
        f.write_str(s)
    }
}

/// Session state as seen by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not terminated. Requests go through the normal pipeline.
    Active,
    /// Terminated; the host should route the user to login.
    Terminated(TerminationReason),
}

/// Ends the session at most once per login.
#[derive(Debug)]
pub struct SessionTerminator {
    store: Arc<TokenStore>,
    terminated: AtomicBool,
    state: watch::Sender<SessionState>,
}

impl SessionTerminator {
    pub fn new(store: Arc<TokenStore>) -> Self {
        let (state, _) = watch::channel(SessionState::Active);
        Self {
            store,
            terminated: AtomicBool::new(false),
            state,
        }
    }

    /// Clear both token scopes and publish `Terminated(reason)`.
    ///
    /// Only the first call after [`arm`](Self::arm) has any effect; it
    /// returns `true`. Later calls return `false`.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            tracing::debug!(%reason, "session already terminated");
            return false;
        }

        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear tokens while terminating session");
        }

        tracing::info!(%reason, "session terminated");
        self.state.send_replace(SessionState::Terminated(reason));
        true
    }

    /// Re-arm after new tokens were stored.
    pub fn arm(&self) {
        self.terminated.store(false, Ordering::SeqCst);
        self.state.send_replace(SessionState::Active);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receive every session state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Scope, TokenPair};

    fn terminator() -> (Arc<TokenStore>, SessionTerminator) {
        let store = Arc::new(TokenStore::in_memory());
        store
            .set(&TokenPair::new("a", "r"), Scope::Durable)
            .unwrap();
        let terminator = SessionTerminator::new(store.clone());
        (store, terminator)
    }

    #[test]
    fn test_terminate_clears_store_and_publishes() {
        let (store, terminator) = terminator();
        assert_eq!(terminator.state(), SessionState::Active);

        assert!(terminator.terminate(TerminationReason::RefreshFailed));

        assert!(store.get().unwrap().is_empty());
        assert!(terminator.is_terminated());
        assert_eq!(
            terminator.state(),
            SessionState::Terminated(TerminationReason::RefreshFailed)
        );
    }

    #[test]
    fn test_terminate_is_one_shot() {
        let (_store, terminator) = terminator();
        assert!(terminator.terminate(TerminationReason::BothTokensExpired));
        assert!(!terminator.terminate(TerminationReason::RetryRejected));

        // the first reason sticks
        assert_eq!(
            terminator.state(),
            SessionState::Terminated(TerminationReason::BothTokensExpired)
        );
    }

    #[test]
    fn test_concurrent_terminate_fires_once() {
        let (_store, terminator) = terminator();
        let terminator = Arc::new(terminator);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = terminator.clone();
                std::thread::spawn(move || t.terminate(TerminationReason::RefreshFailed))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (_store, terminator) = terminator();
        let mut rx = terminator.subscribe();

        terminator.terminate(TerminationReason::Logout);
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update(),
            SessionState::Terminated(TerminationReason::Logout)
        );

        terminator.arm();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Active);
        assert!(!terminator.is_terminated());
    }

    #[test]
    fn test_rearmed_session_can_terminate_again() {
        let (_store, terminator) = terminator();
        assert!(terminator.terminate(TerminationReason::Logout));
        terminator.arm();
        assert!(terminator.terminate(TerminationReason::RefreshFailed));
    }
}
