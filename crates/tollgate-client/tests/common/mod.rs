//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use wiremock::MockServer;

use tollgate_client::{ClientConfig, Scope, TokenPair, TokenStore, TollgateClient};

/// A JWT-shaped token whose `exp` is `secs` from now (negative = past).
pub fn token_expiring_in(secs: i64, subject: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD
        .encode(serde_json::json!({ "sub": subject, "exp": now + secs }).to_string());
    format!("{}.{}.signature", header, claims)
}

/// An access token valid for an hour.
pub fn fresh_access(subject: &str) -> String {
    token_expiring_in(3600, subject)
}

/// A refresh token valid for a week.
pub fn fresh_refresh(subject: &str) -> String {
    token_expiring_in(7 * 24 * 3600, subject)
}

/// A client pointed at the mock server with an in-memory store.
pub fn client_for(server: &MockServer) -> TollgateClient {
    client_with_config(server, ClientConfig::new())
}

pub fn client_with_config(server: &MockServer, config: ClientConfig) -> TollgateClient {
    TollgateClient::builder()
        .config(config.with_base_url(server.uri()))
        .token_store(TokenStore::in_memory())
        .build()
        .unwrap()
}

/// Store `access`/`refresh` in the transient scope.
pub fn seed(client: &TollgateClient, access: &str, refresh: &str) -> Arc<TokenStore> {
    client
        .set_tokens(&TokenPair::new(access, refresh), Scope::Transient)
        .unwrap();
    client.store().clone()
}

/// `Bearer <token>`.
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
