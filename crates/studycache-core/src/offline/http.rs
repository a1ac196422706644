//! Request and response values passed through the controller.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::CacheError;

/// What the page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// A top-level navigation.
    Document,
    Script,
    Style,
    Image,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub destination: Destination,
}

impl Request {
    pub fn new(method: &str, url: &str) -> Result<Self, CacheError> {
        let url = Url::parse(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            method: method.to_ascii_uppercase(),
            url,
            destination: Destination::Other,
        })
    }

    pub fn get(url: &str) -> Result<Self, CacheError> {
        Self::new("GET", url)
    }

    pub fn get_url(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            destination: Destination::Other,
        }
    }

    /// A navigation request for a full page.
    pub fn document(url: &str) -> Result<Self, CacheError> {
        Ok(Self::get(url)?.with_destination(Destination::Document))
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Identity of the request inside a partition: method plus URL.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    /// Header names are lowercase.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        Self::new(200, body).with_header("content-type", content_type)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_status_text(mut self, text: &str) -> Self {
        self.status_text = text.to_string();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Only these are ever stored.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }

    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn service_unavailable(message: &str) -> Self {
        Self::new(503, message).with_status_text("Service Unavailable")
    }

    pub fn empty_not_found() -> Self {
        Self::new(404, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_identity() {
        let req = Request::new("get", "https://focus.example/js/app.js").unwrap();
        assert!(req.is_get());
        assert_eq!(req.cache_key(), "GET https://focus.example/js/app.js");
        assert!(Request::get("not a url").is_err());
    }

    #[test]
    fn test_response_headers_are_case_insensitive() {
        let resp = Response::ok("<p>hi</p>", "text/html; charset=utf-8");
        assert!(resp.is_html());
        assert_eq!(resp.header("Content-Type"), Some("text/html; charset=utf-8"));
        assert!(!Response::new(201, "").is_cacheable());
    }
}
