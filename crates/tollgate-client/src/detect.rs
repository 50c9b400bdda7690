//! Reactive expiry detection.
//!
//! Upstreams disagree on how they report a dead access token: most answer
//! 401, some answer 200 with a "jwt expired" message. Each convention is a
//! detector; the client replays a request when any configured detector
//! fires.

use std::sync::Arc;

use reqwest::StatusCode;

use crate::config::AuthConfig;
use crate::response::ApiResponse;

/// Decides whether a response means "your access token is no longer valid".
pub trait ExpiryDetector: Send + Sync {
    fn is_expired(&self, response: &ApiResponse) -> bool;
}

impl<F> ExpiryDetector for F
where
    F: Fn(&ApiResponse) -> bool + Send + Sync,
{
    fn is_expired(&self, response: &ApiResponse) -> bool {
        self(response)
    }
}

/// Shared detector handle.
pub type SharedDetector = Arc<dyn ExpiryDetector>;

/// Fires on HTTP 401.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnauthorizedStatus;

impl ExpiryDetector for UnauthorizedStatus {
    fn is_expired(&self, response: &ApiResponse) -> bool {
        response.status() == StatusCode::UNAUTHORIZED
    }
}

/// Fires on a 2xx JSON body whose `message` contains one of the markers.
#[derive(Debug, Clone)]
pub struct MessageMarker {
    markers: Vec<String>,
}

impl MessageMarker {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

impl ExpiryDetector for MessageMarker {
    fn is_expired(&self, response: &ApiResponse) -> bool {
        if !response.is_success() || self.markers.is_empty() {
            return false;
        }
        match response.message() {
            Some(message) => {
                let message = message.to_lowercase();
                self.markers.iter().any(|m| message.contains(m.as_str()))
            }
            None => false,
        }
    }
}

/// The detectors selected by `[auth]`.
pub fn default_detectors(config: &AuthConfig) -> Vec<SharedDetector> {
    let mut detectors: Vec<SharedDetector> = vec![Arc::new(UnauthorizedStatus)];
    if config.detect_in_band_expiry {
        detectors.push(Arc::new(MessageMarker::new(config.expiry_markers.clone())));
    }
    detectors
}
