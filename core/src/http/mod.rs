pub mod client;
pub mod retry;

#[cfg(test)]
pub(crate) mod canned;

pub use client::HttpClient;
pub use retry::{RetryPolicy, Verdict};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{PollError, Result};

/// Authentication attached to a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

/// An outgoing API request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub auth: Auth,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            method: Method::GET,
            url,
            headers,
            auth: Auth::None,
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PollError::Request(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PollError::Request(format!("invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// A fully read response the retry policy accepted.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// The platform says the resource no longer exists.
    pub fn is_gone(&self) -> bool {
        self.status == 404 || self.status == 410
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| PollError::Parse {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

/// Parses a URL, mapping failures into [`PollError::Request`].
pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| PollError::Request(format!("invalid URL '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_defaults() {
        let request = HttpRequest::get(parse_url("https://api.example.com/v1/programs").unwrap());
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.auth, Auth::None);
        assert_eq!(request.headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn test_with_header_rejects_garbage() {
        let request = HttpRequest::get(parse_url("https://example.com").unwrap());
        assert!(request.clone().with_header("X-Ok", "yes").is_ok());
        assert!(request.with_header("bad header", "v").is_err());
    }

    #[test]
    fn test_response_json_and_gone() {
        let response = HttpResponse {
            url: "https://example.com".to_string(),
            status: 404,
            body: r#"{"data":[1,2]}"#.to_string(),
        };
        assert!(response.is_gone());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["data"][1], 2);

        let broken = HttpResponse { body: "<html>".to_string(), ..response };
        assert!(matches!(broken.json::<serde_json::Value>(), Err(PollError::Parse { .. })));
    }

    #[test]
    fn test_parse_url_error() {
        assert!(matches!(parse_url("not a url"), Err(PollError::Request(_))));
    }
}
