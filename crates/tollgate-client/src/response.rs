//! Buffered responses and their decoded outcome.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// A fully buffered HTTP response.
///
/// The body is read once so that expiry detectors can inspect it and the
/// caller still gets it afterwards.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub(crate) async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self::new(status, headers, body))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body as (lossy) UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the raw body, ignoring the status.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The `message` field of a JSON body, if any.
    pub fn message(&self) -> Option<String> {
        let value: Value = serde_json::from_slice(&self.body).ok()?;
        value.get("message")?.as_str().map(str::to_string)
    }

    /// Decode into the outcome union.
    pub fn outcome<T: DeserializeOwned>(&self) -> Result<Outcome<T>> {
        Ok(Outcome::decode(self.status, &self.body)?)
    }

    /// Decode a successful body, turning every other outcome into an error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        match self.outcome()? {
            Outcome::Ok(data) => Ok(data),
            Outcome::Unauthorized => Err(Error::Api {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: self.message().unwrap_or_else(|| "unauthorized".to_string()),
            }),
            Outcome::ServerError { status, detail } => Err(Error::Api {
                status,
                message: detail,
            }),
        }
    }
}

/// A server response, classified once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// 2xx with a usable payload.
    Ok(T),
    /// HTTP 401.
    Unauthorized,
    /// Any other failure, including a 2xx body of `{"status": false}`.
    ServerError { status: u16, detail: String },
}

impl<T: DeserializeOwned> Outcome<T> {
    pub fn decode(status: StatusCode, body: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Outcome::Unauthorized);
        }

        if !status.is_success() {
            let detail =
                error_detail(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Ok(Outcome::ServerError {
                status: status.as_u16(),
                detail,
            });
        }

        let value: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(body)?
        };

        if value.get("status").and_then(Value::as_bool) == Some(false) {
            let detail = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Ok(Outcome::ServerError {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(Outcome::Ok(serde_json::from_value(value)?))
    }
}

/// Best-effort error text: `message`, `error` or `error.message`, else the
/// raw body.
fn error_detail(body: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let found = value
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| value.get("error").and_then(Value::as_str))
            .or_else(|| {
                value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            });
        if let Some(detail) = found {
            return Some(detail.to_string());
        }
    }

    let text = String::from_utf8_lossy(body).trim().to_string();
    (!text.is_empty()).then_some(text)
}
