//! REST client for the hosted record store.
//!
//! The backend exposes each collection at `{base}/rest/v1/{collection}`.
//! Filters travel as query parameters (`column=eq.value`, `or=(a.eq.x,b.eq.y)`),
//! and write behaviour is selected with the `Prefer` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Condition, Query, RecordStore, Row, StoreError};

// ============================================================================
// Constants
// ============================================================================

/// Path prefix of the REST interface
const REST_PATH: &str = "rest/v1";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const PREFER_RETURN: &str = "return=representation";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";
const PREFER_COUNT: &str = "count=exact";

/// Record store client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    initial_backoff: Duration,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff delay; later retries double it.
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, collection)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, StoreError> {
        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(&self.api_key)
            .map_err(|e| StoreError::Unauthorized(e.to_string()))?;
        headers.insert("apikey", key);
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| StoreError::Unauthorized(e.to_string()))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Render a filter value the way the REST dialect expects it.
    fn render_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        }
    }

    fn query_params(query: &Query) -> Vec<(String, String)> {
        query
            .conditions
            .iter()
            .map(|condition| match condition {
                Condition::Eq(column, value) => {
                    (column.clone(), format!("eq.{}", Self::render_value(value)))
                }
                Condition::AnyEq(pairs) => {
                    let alternatives: Vec<String> = pairs
                        .iter()
                        .map(|(c, v)| format!("{}.eq.{}", c, Self::render_value(v)))
                        .collect();
                    ("or".to_string(), format!("({})", alternatives.join(",")))
                }
            })
            .collect()
    }

    fn request(&self, method: Method, collection: &str) -> Result<RequestBuilder, StoreError> {
        Ok(self
            .client
            .request(method, self.table_url(collection))
            .headers(self.auth_headers()?))
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, StoreError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::from_status(status, &body))
        }
    }

    /// Send a request built by `build`, retrying with exponential backoff on 429.
    async fn execute<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn() -> Result<RequestBuilder, StoreError>,
    {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = build()?.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(StoreError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn rows(response: Response) -> Result<Vec<Row>, StoreError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn first(rows: Vec<Row>, collection: &str) -> Result<Row, StoreError> {
        rows.into_iter().next().ok_or_else(|| {
            StoreError::InvalidResponse(format!("{} write returned no row", collection))
        })
    }

    /// Parse the total out of a `Content-Range: 0-0/42` header.
    fn parse_content_range(value: &str) -> Option<u64> {
        value.rsplit('/').next()?.trim().parse().ok()
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let params = Self::query_params(query);
        let response = self
            .execute(|| {
                Ok(self
                    .request(Method::GET, collection)?
                    .query(&[("select", "*")])
                    .query(&params))
            })
            .await?;
        let rows = Self::rows(response).await?;
        debug!(collection = collection, count = rows.len(), "Selected rows");
        Ok(rows)
    }

    async fn insert(&self, collection: &str, row: Row) -> Result<Row, StoreError> {
        let body = Value::Array(vec![Value::Object(row)]);
        let response = self
            .execute(|| {
                Ok(self
                    .request(Method::POST, collection)?
                    .header("Prefer", PREFER_RETURN)
                    .json(&body))
            })
            .await?;
        Self::first(Self::rows(response).await?, collection)
    }

    async fn update(&self, collection: &str, query: &Query, changes: Row) -> Result<Vec<Row>, StoreError> {
        let params = Self::query_params(query);
        let body = Value::Object(changes);
        let response = self
            .execute(|| {
                Ok(self
                    .request(Method::PATCH, collection)?
                    .header("Prefer", PREFER_RETURN)
                    .query(&params)
                    .json(&body))
            })
            .await?;
        Self::rows(response).await
    }

    async fn upsert(&self, collection: &str, row: Row, on_conflict: &[&str]) -> Result<Row, StoreError> {
        let conflict = on_conflict.join(",");
        let body = Value::Array(vec![Value::Object(row)]);
        let response = self
            .execute(|| {
                Ok(self
                    .request(Method::POST, collection)?
                    .header("Prefer", PREFER_UPSERT)
                    .query(&[("on_conflict", conflict.as_str())])
                    .json(&body))
            })
            .await?;
        Self::first(Self::rows(response).await?, collection)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let response = self
            .execute(|| {
                Ok(self
                    .request(Method::HEAD, collection)?
                    .header("Prefer", PREFER_COUNT)
                    .query(&[("select", "*")]))
            })
            .await?;

        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse_content_range)
            .ok_or_else(|| StoreError::InvalidResponse("missing Content-Range total".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_query_params() {
        let query = Query::new()
            .eq("user_id", "u1")
            .eq("td_number", 3)
            .any_eq(&[("username", json!("alice")), ("email", json!("a@x.io"))]);
        let params = RestStore::query_params(&query);
        assert_eq!(
            params,
            vec![
                ("user_id".to_string(), "eq.u1".to_string()),
                ("td_number".to_string(), "eq.3".to_string()),
                ("or".to_string(), "(username.eq.alice,email.eq.a@x.io)".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(RestStore::parse_content_range("0-0/42"), Some(42));
        assert_eq!(RestStore::parse_content_range("*/0"), Some(0));
        assert_eq!(RestStore::parse_content_range("0-0/*"), None);
    }

    #[tokio::test]
    async fn test_select_sends_filters_and_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/td_progress"))
            .and(query_param("user_id", "eq.u1"))
            .and(header_eq("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"user_id": "u1", "td_number": 1, "td_type": "proba", "is_completed": true}
            ])))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key").unwrap();
        let rows = store
            .select("td_progress", &Query::new().eq("user_id", "u1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["td_type"], "proba");
    }

    #[tokio::test]
    async fn test_upsert_uses_conflict_key() {
        let server = MockServer::start().await;
        let payload = json!({"user_id": "u1", "td_number": 3, "td_type": "proba"});

        Mock::given(method("POST"))
            .and(path("/rest/v1/td_progress"))
            .and(query_param("on_conflict", "user_id,td_number,td_type"))
            .and(header_eq("Prefer", PREFER_UPSERT))
            .and(body_json(json!([payload.clone()])))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([payload.clone()])))
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key").unwrap();
        let stored = store
            .upsert("td_progress", row(payload), &["user_id", "td_number", "td_type"])
            .await
            .unwrap();
        assert_eq!(stored["td_number"], 3);
    }

    #[tokio::test]
    async fn test_insert_unique_violation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"users_email_key\""
            })))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key").unwrap();
        let err = store
            .insert("users", row(json!({"username": "alice", "email": "a@x.io"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_count_reads_content_range() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/rest/v1/users"))
            .and(header_eq("Prefer", PREFER_COUNT))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "0-24/25"))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key").unwrap();
        assert_eq!(store.count("users").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "u1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key")
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let rows = store.select("users", &Query::new()).await.unwrap();
        assert_eq!(rows[0]["id"], "u1");
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_gives_up() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(429))
            .expect(u64::from(MAX_RATE_LIMIT_RETRIES) + 1)
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key")
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = store.select("users", &Query::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::RateLimited));
    }
}
