//! HTTP delivery of analytics batches and diagnostic payloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, DATE};
use reqwest::{Client, Url};
use std::time::Duration;

use crate::error::{ErrorCode, EventsError, Result};
use crate::http::{concatenate_uri_path, with_retry_predicate, HttpProperties, RetryPolicy};

/// Path appended to the base URI for analytics batches.
pub const ANALYTICS_PATH: &str = "/bulk";
/// Path appended to the base URI for diagnostic payloads.
pub const DIAGNOSTIC_PATH: &str = "/diagnostic";

pub const EVENT_SCHEMA_HEADER: HeaderName = HeaderName::from_static("x-flagkit-event-schema");
pub const EVENT_SCHEMA_VERSION: &str = "4";
pub const EVENT_COUNT_HEADER: HeaderName = HeaderName::from_static("x-flagkit-event-count");
pub const PAYLOAD_ID_HEADER: HeaderName = HeaderName::from_static("x-flagkit-payload-id");

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Outcome of one delivery, including its retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    /// The endpoint rejected us permanently; stop sending.
    pub must_shut_down: bool,
    /// The server's `Date` header, if it sent one.
    pub time_from_server: Option<DateTime<Utc>>,
}

impl SendResult {
    pub fn success(time_from_server: Option<DateTime<Utc>>) -> Self {
        Self {
            success: true,
            must_shut_down: false,
            time_from_server,
        }
    }

    pub fn failure(must_shut_down: bool) -> Self {
        Self {
            success: false,
            must_shut_down,
            time_from_server: None,
        }
    }
}

/// Transport used by the event processor. Implementations must never panic on
/// delivery failure; every failure is reported through [`SendResult`].
#[async_trait]
pub trait EventSender: Send + Sync {
    async fn send_analytics_events(
        &self,
        data: Vec<u8>,
        event_count: usize,
        base_uri: &Url,
    ) -> SendResult;

    async fn send_diagnostic_event(&self, data: Vec<u8>, base_uri: &Url) -> SendResult;

    /// Release transport resources. Called once when the processor closes.
    async fn close(&self) {}
}

#[derive(Debug, Clone, Copy)]
enum Payload {
    Analytics { event_count: usize },
    Diagnostic,
}

impl Payload {
    fn path(&self) -> &'static str {
        match self {
            Payload::Analytics { .. } => ANALYTICS_PATH,
            Payload::Diagnostic => DIAGNOSTIC_PATH,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Payload::Analytics { .. } => "analytics events",
            Payload::Diagnostic => "diagnostic event",
        }
    }
}

/// Sends payloads with `reqwest`, retrying a recoverable failure once after a fixed delay.
pub struct DefaultEventSender {
    properties: HttpProperties,
    client: Mutex<Option<Client>>,
    retry_policy: RetryPolicy,
}

impl DefaultEventSender {
    pub fn new(properties: HttpProperties) -> Result<Self> {
        Self::with_retry_delay(properties, DEFAULT_RETRY_DELAY)
    }

    pub fn with_retry_delay(properties: HttpProperties, retry_delay: Duration) -> Result<Self> {
        let client = properties.to_client()?;
        Ok(Self {
            properties,
            client: Mutex::new(Some(client)),
            retry_policy: RetryPolicy::builder()
                .max_attempts(2)
                .delay(retry_delay)
                .build(),
        })
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_policy.delay
    }

    fn request_headers(&self, payload: Payload) -> HeaderMap {
        let mut headers = self.properties.to_header_map();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(EVENT_SCHEMA_HEADER, HeaderValue::from_static(EVENT_SCHEMA_VERSION));
        if let Payload::Analytics { event_count } = payload {
            headers.insert(EVENT_COUNT_HEADER, HeaderValue::from(event_count));
            let payload_id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&payload_id) {
                headers.insert(PAYLOAD_ID_HEADER, value);
            }
        }
        headers
    }

    async fn send_payload(&self, payload: Payload, data: Vec<u8>, base_uri: &Url) -> SendResult {
        let client = self.client.lock().clone();
        let Some(client) = client else {
            tracing::debug!("Event sender is closed, not sending {}", payload.description());
            return SendResult::failure(false);
        };

        let uri = concatenate_uri_path(base_uri, payload.path());
        // The payload ID stays the same across the retry so the server can discard duplicates.
        let headers = self.request_headers(payload);

        tracing::debug!(
            "Posting {} ({} bytes) to {}",
            payload.description(),
            data.len(),
            uri
        );

        let outcome = with_retry_predicate(
            |_| post_once(&client, &uri, &headers, &data),
            &self.retry_policy,
            |e| e.is_recoverable(),
        )
        .await;

        match outcome.into_result() {
            Ok(time_from_server) => SendResult::success(time_from_server),
            Err(e) if e.status.is_some() && !e.is_recoverable() => {
                tracing::error!(
                    "Received unrecoverable error sending {}: {}; no further events will be sent",
                    payload.description(),
                    e
                );
                SendResult::failure(true)
            }
            Err(e) => {
                tracing::warn!("Failed to send {}: {}", payload.description(), e);
                SendResult::failure(false)
            }
        }
    }
}

async fn post_once(
    client: &Client,
    uri: &Url,
    headers: &HeaderMap,
    data: &[u8],
) -> Result<Option<DateTime<Utc>>> {
    let response = client
        .post(uri.clone())
        .headers(headers.clone())
        .body(data.to_vec())
        .send()
        .await
        .map_err(convert_error)?;

    let status = response.status();
    if !status.is_success() {
        tracing::debug!("Event delivery returned status {}", status.as_u16());
        return Err(EventsError::from_status(status.as_u16(), uri.path()));
    }

    Ok(response
        .headers()
        .get(DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date))
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => Some(date.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!("Ignoring unparseable Date header {:?}: {}", value, e);
            None
        }
    }
}

fn convert_error(error: reqwest::Error) -> EventsError {
    if error.is_timeout() {
        EventsError::with_source(ErrorCode::HttpTimeout, "Request timed out", error)
    } else if error.is_connect() {
        EventsError::with_source(ErrorCode::HttpNetworkError, "Connection failed", error)
    } else {
        EventsError::with_source(ErrorCode::NetworkError, error.to_string(), error)
    }
}

#[async_trait]
impl EventSender for DefaultEventSender {
    async fn send_analytics_events(
        &self,
        data: Vec<u8>,
        event_count: usize,
        base_uri: &Url,
    ) -> SendResult {
        self.send_payload(Payload::Analytics { event_count }, data, base_uri)
            .await
    }

    async fn send_diagnostic_event(&self, data: Vec<u8>, base_uri: &Url) -> SendResult {
        self.send_payload(Payload::Diagnostic, data, base_uri).await
    }

    async fn close(&self) {
        // A shared client belongs to whoever built it.
        if self.properties.owns_client() {
            self.client.lock().take();
        }
    }
}

impl std::fmt::Debug for DefaultEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultEventSender")
            .field("properties", &self.properties)
            .field("retry_delay", &self.retry_policy.delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_date() {
        let date = parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!(date.timestamp(), 784887151);
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_analytics_headers() {
        let props = HttpProperties::builder()
            .header("Authorization", "sdk-key")
            .build();
        let sender = DefaultEventSender::new(props).unwrap();
        let headers = sender.request_headers(Payload::Analytics { event_count: 3 });
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(EVENT_SCHEMA_HEADER).unwrap(), "4");
        assert_eq!(headers.get(EVENT_COUNT_HEADER).unwrap(), "3");
        assert_eq!(headers.get("authorization").unwrap(), "sdk-key");
        assert!(headers.contains_key(PAYLOAD_ID_HEADER));

        let headers = sender.request_headers(Payload::Diagnostic);
        assert!(!headers.contains_key(EVENT_COUNT_HEADER));
        assert!(!headers.contains_key(PAYLOAD_ID_HEADER));
    }

    #[test]
    fn test_result_constructors() {
        assert!(SendResult::success(None).success);
        let failed = SendResult::failure(true);
        assert!(!failed.success);
        assert!(failed.must_shut_down);
    }

    #[tokio::test]
    async fn test_closed_sender_does_not_send() {
        let sender = DefaultEventSender::new(HttpProperties::default()).unwrap();
        sender.close().await;
        let uri = Url::parse("http://127.0.0.1:9").unwrap();
        let result = sender.send_diagnostic_event(b"{}".to_vec(), &uri).await;
        assert_eq!(result, SendResult::failure(false));
    }
}
