//! Token expiry decisions.
//!
//! Tokens are JWT-shaped (`header.claims.signature`, base64url segments) and
//! carry an `exp` claim in seconds since the epoch. A token that cannot be
//! decoded, or that has no usable `exp`, is always reported as expired.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};

use crate::config::DEFAULT_SAFETY_MARGIN;

/// Answers "is this token expired, or about to be within the margin".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryOracle {
    margin: Duration,
}

impl ExpiryOracle {
    pub fn new(margin: Duration) -> Self {
        Self { margin }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Check a token against the current clock.
    pub fn is_expired(&self, token: Option<&str>) -> bool {
        is_expired(token, self.margin)
    }
}

impl Default for ExpiryOracle {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

/// Check a token against the current clock.
pub fn is_expired(token: Option<&str>, margin: Duration) -> bool {
    is_expired_at(token, margin, now_ms())
}

/// Check a token against an explicit clock reading (milliseconds since the
/// epoch).
pub fn is_expired_at(token: Option<&str>, margin: Duration, now_ms: u64) -> bool {
    match token.and_then(expiry_ms) {
        Some(exp_ms) => {
            let margin_ms = u64::try_from(margin.as_millis()).unwrap_or(u64::MAX);
            now_ms >= exp_ms.saturating_sub(margin_ms)
        }
        None => true,
    }
}

/// The decoded `exp` claim, if the token has one.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let ms = i64::try_from(expiry_ms(token)?).ok()?;
    DateTime::from_timestamp_millis(ms)
}

fn expiry_ms(token: &str) -> Option<u64> {
    let mut segments = token.split('.');
    let (_header, claims, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
    // Only a JSON object is a claims set.
    let claims: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_f64()?;
    if !exp.is_finite() || exp < 0.0 {
        return None;
    }
    Some((exp * 1000.0) as u64)
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;

    const MARGIN: Duration = Duration::from_secs(30);
    const NOW_MS: u64 = 1_700_000_000_000;

    fn token_with_claims(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.sig", header, claims)
    }

    fn token_expiring_at(exp_secs: u64) -> String {
        token_with_claims(serde_json::json!({ "sub": "u1", "exp": exp_secs }))
    }

    #[test]
    fn test_future_token_is_valid() {
        let token = token_expiring_at(NOW_MS / 1000 + 3600);
        assert!(!is_expired_at(Some(&token), MARGIN, NOW_MS));
    }

    #[test]
    fn test_token_inside_margin_is_expired() {
        // Expires in 10s, margin is 30s.
        let token = token_expiring_at(NOW_MS / 1000 + 10);
        assert!(is_expired_at(Some(&token), MARGIN, NOW_MS));
        assert!(!is_expired_at(Some(&token), Duration::ZERO, NOW_MS));
    }

    #[test]
    fn test_margin_boundary() {
        let token = token_expiring_at(NOW_MS / 1000 + 30);
        assert!(is_expired_at(Some(&token), MARGIN, NOW_MS));
        assert!(!is_expired_at(Some(&token), MARGIN, NOW_MS - 1));
    }

    #[test]
    fn test_past_token_is_expired() {
        let token = token_expiring_at(NOW_MS / 1000 - 1);
        assert!(is_expired_at(Some(&token), Duration::ZERO, NOW_MS));
    }

    #[test]
    fn test_fractional_exp() {
        let token = token_with_claims(serde_json::json!({ "exp": (NOW_MS / 1000) as f64 + 3600.5 }));
        assert!(!is_expired_at(Some(&token), MARGIN, NOW_MS));
    }

    #[test]
    fn test_padded_claims_segment_is_accepted() {
        let claims = URL_SAFE.encode(br#"{"exp":9999999999}"#);
        let token = format!("e30.{}.sig", claims);
        assert!(!is_expired_at(Some(&token), MARGIN, NOW_MS));
    }

    #[test]
    fn test_malformed_tokens_are_expired() {
        let no_exp = token_with_claims(serde_json::json!({ "sub": "u1" }));
        let string_exp = token_with_claims(serde_json::json!({ "exp": "9999999999" }));
        let negative_exp = token_with_claims(serde_json::json!({ "exp": -5 }));
        let not_json = format!("e30.{}.sig", URL_SAFE_NO_PAD.encode("not json"));
        let too_many = format!("{}.extra", token_expiring_at(9_999_999_999));
        let array_claims = token_with_claims(serde_json::json!([9_999_999_999u64]));
        let null_exp = token_with_claims(serde_json::json!({ "exp": null }));

        let cases = [
            None,
            Some(""),
            Some("opaque-token"),
            Some("only.two"),
            Some("a.!!!.c"),
            Some(".."),
            Some(no_exp.as_str()),
            Some(string_exp.as_str()),
            Some(negative_exp.as_str()),
            Some(not_json.as_str()),
            Some(too_many.as_str()),
            Some(array_claims.as_str()),
            Some(null_exp.as_str()),
        ];
        for token in cases {
            assert!(is_expired_at(token, MARGIN, NOW_MS), "{:?}", token);
        }
    }

    #[test]
    fn test_oracle_uses_wall_clock() {
        let oracle = ExpiryOracle::default();
        assert_eq!(oracle.margin(), MARGIN);

        let fresh = token_expiring_at(now_ms() / 1000 + 3600);
        let stale = token_expiring_at(now_ms() / 1000 + 5);
        assert!(!oracle.is_expired(Some(&fresh)));
        assert!(oracle.is_expired(Some(&stale)));
        assert!(oracle.is_expired(None));
    }

    #[test]
    fn test_expires_at() {
        let token = token_expiring_at(1_700_000_000);
        let at = expires_at(&token).unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);

        assert!(expires_at("garbage").is_none());
    }
}
