use flagkit_events::events::{
    ANALYTICS_PATH, DIAGNOSTIC_PATH, EVENT_COUNT_HEADER, EVENT_SCHEMA_HEADER, PAYLOAD_ID_HEADER,
};
use flagkit_events::{DefaultEventSender, EventSender, HttpProperties};
use reqwest::Url;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sender() -> DefaultEventSender {
    let props = HttpProperties::builder()
        .header("Authorization", "sdk-test-key")
        .build();
    DefaultEventSender::with_retry_delay(props, Duration::from_millis(20)).unwrap()
}

fn base_uri(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

mod analytics_delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_success_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANALYTICS_PATH))
            .and(header("content-type", "application/json"))
            .and(header("authorization", "sdk-test-key"))
            .and(header("x-flagkit-event-schema", "4"))
            .and(header("x-flagkit-event-count", "2"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let result = sender()
            .send_analytics_events(b"[{},{}]".to_vec(), 2, &base_uri(&server))
            .await;

        assert!(result.success);
        assert!(!result.must_shut_down);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, b"[{},{}]".to_vec());
        assert!(requests[0].headers.contains_key(PAYLOAD_ID_HEADER.as_str()));
    }

    #[tokio::test]
    async fn test_server_error_then_success_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ANALYTICS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ANALYTICS_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = sender()
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;

        assert!(result.success);
        assert!(!result.must_shut_down);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].headers.get(PAYLOAD_ID_HEADER.as_str()),
            requests[1].headers.get(PAYLOAD_ID_HEADER.as_str())
        );
    }

    #[tokio::test]
    async fn test_repeated_server_error_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let result = sender()
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;

        assert!(!result.success);
        assert!(!result.must_shut_down);
    }

    #[tokio::test]
    async fn test_recoverable_client_statuses_retry() {
        for status in [408, 429] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .expect(2)
                .mount(&server)
                .await;

            let result = sender()
                .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
                .await;
            assert!(!result.success);
            assert!(!result.must_shut_down, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_not_modified_is_retried_and_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(304))
            .expect(2)
            .mount(&server)
            .await;

        let result = sender()
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;

        assert!(!result.success);
        assert!(!result.must_shut_down);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_must_shut_down_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let result = sender()
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;

        assert!(!result.success);
        assert!(result.must_shut_down);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_and_bad_request_are_fatal() {
        for status in [400, 403, 404] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;

            let result = sender()
                .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
                .await;
            assert!(result.must_shut_down, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_date_header_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Date", "Tue, 15 Nov 1994 08:12:31 GMT"),
            )
            .mount(&server)
            .await;

        let result = sender()
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;

        assert!(result.success);
        assert_eq!(result.time_from_server.unwrap().timestamp(), 784887151);
    }

    #[tokio::test]
    async fn test_base_uri_path_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events/bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let uri = Url::parse(&format!("{}/events/", server.uri())).unwrap();
        let result = sender().send_analytics_events(b"[]".to_vec(), 0, &uri).await;
        assert!(result.success);
    }
}

mod diagnostic_delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_diagnostic_path_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DIAGNOSTIC_PATH))
            .and(header("x-flagkit-event-schema", "4"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = sender()
            .send_diagnostic_event(br#"{"kind":"diagnostic"}"#.to_vec(), &base_uri(&server))
            .await;
        assert!(result.success);

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key(EVENT_COUNT_HEADER.as_str()));
        assert!(requests[0].headers.contains_key(EVENT_SCHEMA_HEADER.as_str()));
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_fatal() {
        let uri = Url::parse("http://127.0.0.1:9").unwrap();
        let result = sender().send_diagnostic_event(b"{}".to_vec(), &uri).await;
        assert!(!result.success);
        assert!(!result.must_shut_down);
    }
}

mod sender_lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_owned_client_released_on_close() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sender = sender();
        sender.close().await;
        let result = sender
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_shared_client_survives_close() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let props = HttpProperties::with_shared_client(
            reqwest::Client::new(),
            Default::default(),
            None,
        );
        let sender = DefaultEventSender::new(props).unwrap();
        sender.close().await;

        let result = sender
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_headers_transformer_applied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-custom", "added"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let props = HttpProperties::builder()
            .headers_transformer(|h| {
                h.insert("X-Custom".to_string(), "added".to_string());
            })
            .build();
        let sender = DefaultEventSender::new(props).unwrap();
        let result = sender
            .send_analytics_events(b"[]".to_vec(), 0, &base_uri(&server))
            .await;
        assert!(result.success);
    }
}
