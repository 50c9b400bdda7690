//! Authenticated HTTP client with transparent token refresh.
//!
//! Wraps every request in a token lifecycle: expired access tokens are
//! refreshed before sending, rejected requests are refreshed and replayed
//! once, and concurrent refreshes collapse into a single network call. When
//! refresh is impossible the session is terminated and subscribers are told
//! to send the user back to login.
//!
//! # Example
//!
//! ```no_run
//! use tollgate_client::{SessionState, TollgateClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = TollgateClient::builder()
//!     .base_url("https://api.example.com")
//!     .build()?;
//!
//! // Route to login whenever the session ends.
//! let mut session = client.subscribe();
//! tokio::spawn(async move {
//!     while session.changed().await.is_ok() {
//!         if let SessionState::Terminated(reason) = *session.borrow() {
//!             eprintln!("session ended: {}", reason);
//!         }
//!     }
//! });
//!
//! // Refresh and retry happen behind this call.
//! let contacts: serde_json::Value = client.get("contacts").await?;
//! println!("{}", contacts);
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`expiry`]: decodes a token's `exp` claim; undecodable means expired
//! - [`store`]: access/refresh tokens across a durable and a transient scope
//! - [`refresh`]: single-flight refresh coordinator with a bounded FIFO queue
//! - [`session`]: one-shot session termination and state broadcast
//! - [`detect`]: pluggable "this response means the token died" predicates
//! - [`client`]: the request pipeline tying them together

pub mod client;
pub mod config;
pub mod detect;
pub mod error;
pub mod expiry;
pub mod refresh;
pub mod response;
pub mod session;
pub mod store;

pub use client::{ClientBuilder, RequestBuilder, TollgateClient};
pub use config::{AuthConfig, ClientConfig, StorageConfig};
pub use detect::{ExpiryDetector, MessageMarker, SharedDetector, UnauthorizedStatus};
pub use error::{Error, RefreshError, Result, StorageError};
pub use expiry::ExpiryOracle;
pub use refresh::{HttpRefresher, RefreshCoordinator, RefreshPolicy, RefreshedTokens, Refresher};
pub use response::{ApiResponse, Outcome};
pub use session::{SessionState, SessionTerminator, TerminationReason};
pub use store::{
    FileStorage, MemoryStorage, Scope, StoredTokens, TokenInfo, TokenPair, TokenStorage,
    TokenStore,
};

// Re-exported so callers can build requests without a direct reqwest dependency.
pub use reqwest::{Method, StatusCode, header};
