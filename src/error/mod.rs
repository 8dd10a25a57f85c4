use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Network errors
    NetworkError,
    NetworkRetryLimit,

    // HTTP errors
    HttpBadRequest,
    HttpUnauthorized,
    HttpForbidden,
    HttpNotFound,
    HttpRequestTimeout,
    HttpPayloadTooLarge,
    HttpRateLimited,
    HttpClientError,
    HttpServerError,
    HttpUnexpectedStatus,
    HttpTimeout,
    HttpNetworkError,
    HttpClientBuildFailed,

    // Event errors
    EventSerializationFailed,

    // Processor errors
    ProcessorNoRuntime,

    // Configuration errors
    ConfigInvalidUrl,
    ConfigInvalidCapacity,
    ConfigInvalidInterval,
    ConfigInvalidPoolSize,
    ConfigInvalidProxy,
    ConfigInvalidCertificate,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkRetryLimit => "NETWORK_RETRY_LIMIT",
            ErrorCode::HttpBadRequest => "HTTP_BAD_REQUEST",
            ErrorCode::HttpUnauthorized => "HTTP_UNAUTHORIZED",
            ErrorCode::HttpForbidden => "HTTP_FORBIDDEN",
            ErrorCode::HttpNotFound => "HTTP_NOT_FOUND",
            ErrorCode::HttpRequestTimeout => "HTTP_REQUEST_TIMEOUT",
            ErrorCode::HttpPayloadTooLarge => "HTTP_PAYLOAD_TOO_LARGE",
            ErrorCode::HttpRateLimited => "HTTP_RATE_LIMITED",
            ErrorCode::HttpClientError => "HTTP_CLIENT_ERROR",
            ErrorCode::HttpServerError => "HTTP_SERVER_ERROR",
            ErrorCode::HttpUnexpectedStatus => "HTTP_UNEXPECTED_STATUS",
            ErrorCode::HttpTimeout => "HTTP_TIMEOUT",
            ErrorCode::HttpNetworkError => "HTTP_NETWORK_ERROR",
            ErrorCode::HttpClientBuildFailed => "HTTP_CLIENT_BUILD_FAILED",
            ErrorCode::EventSerializationFailed => "EVENT_SERIALIZATION_FAILED",
            ErrorCode::ProcessorNoRuntime => "PROCESSOR_NO_RUNTIME",
            ErrorCode::ConfigInvalidUrl => "CONFIG_INVALID_URL",
            ErrorCode::ConfigInvalidCapacity => "CONFIG_INVALID_CAPACITY",
            ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
            ErrorCode::ConfigInvalidPoolSize => "CONFIG_INVALID_POOL_SIZE",
            ErrorCode::ConfigInvalidProxy => "CONFIG_INVALID_PROXY",
            ErrorCode::ConfigInvalidCertificate => "CONFIG_INVALID_CERTIFICATE",
        }
    }

    /// Whether a delivery that failed with this code may succeed on a later attempt.
    ///
    /// Connection failures, timeouts, 408, 429, any 5xx and statuses outside 4xx/5xx are
    /// recoverable. Every other 4xx means the endpoint will keep refusing us.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::NetworkRetryLimit
                | ErrorCode::HttpRequestTimeout
                | ErrorCode::HttpRateLimited
                | ErrorCode::HttpServerError
                | ErrorCode::HttpUnexpectedStatus
                | ErrorCode::HttpTimeout
                | ErrorCode::HttpNetworkError
        )
    }

    /// Maps a non-success HTTP status to an error code.
    pub fn from_status(status: u16) -> ErrorCode {
        match status {
            400 => ErrorCode::HttpBadRequest,
            401 => ErrorCode::HttpUnauthorized,
            403 => ErrorCode::HttpForbidden,
            404 => ErrorCode::HttpNotFound,
            408 => ErrorCode::HttpRequestTimeout,
            413 => ErrorCode::HttpPayloadTooLarge,
            429 => ErrorCode::HttpRateLimited,
            400..=499 => ErrorCode::HttpClientError,
            s if s >= 500 => ErrorCode::HttpServerError,
            _ => ErrorCode::HttpUnexpectedStatus,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct EventsError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status of the rejected request, when the error came from a response.
    pub status: Option<u16>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EventsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    /// Builds the error for an HTTP response with a non-2xx status.
    pub fn from_status(status: u16, context: &str) -> Self {
        let code = ErrorCode::from_status(status);
        let category = match code {
            ErrorCode::HttpUnauthorized => "Authentication Error",
            ErrorCode::HttpForbidden => "Authorization Error",
            ErrorCode::HttpRateLimited => "Rate Limited",
            ErrorCode::HttpServerError => "Server Error",
            ErrorCode::HttpUnexpectedStatus => "Unexpected Status",
            _ => "Client Error",
        };
        Self {
            code,
            message: format!("{}: {} ({})", category, status, context),
            status: Some(status),
            source: None,
        }
    }

    pub fn config_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn network_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConfigInvalidUrl
                | ErrorCode::ConfigInvalidCapacity
                | ErrorCode::ConfigInvalidInterval
                | ErrorCode::ConfigInvalidPoolSize
                | ErrorCode::ConfigInvalidProxy
                | ErrorCode::ConfigInvalidCertificate
        )
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::NetworkError
                | ErrorCode::NetworkRetryLimit
                | ErrorCode::HttpBadRequest
                | ErrorCode::HttpUnauthorized
                | ErrorCode::HttpForbidden
                | ErrorCode::HttpNotFound
                | ErrorCode::HttpRequestTimeout
                | ErrorCode::HttpPayloadTooLarge
                | ErrorCode::HttpRateLimited
                | ErrorCode::HttpClientError
                | ErrorCode::HttpServerError
                | ErrorCode::HttpUnexpectedStatus
                | ErrorCode::HttpTimeout
                | ErrorCode::HttpNetworkError
        )
    }
}

pub type Result<T> = std::result::Result<T, EventsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::from_status(401), ErrorCode::HttpUnauthorized);
        assert_eq!(ErrorCode::from_status(403), ErrorCode::HttpForbidden);
        assert_eq!(ErrorCode::from_status(408), ErrorCode::HttpRequestTimeout);
        assert_eq!(ErrorCode::from_status(418), ErrorCode::HttpClientError);
        assert_eq!(ErrorCode::from_status(429), ErrorCode::HttpRateLimited);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::HttpServerError);
        assert_eq!(ErrorCode::from_status(304), ErrorCode::HttpUnexpectedStatus);
        assert_eq!(ErrorCode::from_status(101), ErrorCode::HttpUnexpectedStatus);
    }

    #[test]
    fn test_recoverable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(
                EventsError::from_status(status, "test").is_recoverable(),
                "expected {} to be recoverable",
                status
            );
        }
        for status in [400, 401, 403, 404, 413] {
            assert!(
                !EventsError::from_status(status, "test").is_recoverable(),
                "expected {} to be unrecoverable",
                status
            );
        }
    }

    #[test]
    fn test_display_includes_code() {
        let error = EventsError::from_status(401, "posting events");
        let displayed = format!("{}", error);
        assert!(displayed.contains("[HTTP_UNAUTHORIZED]"));
        assert!(displayed.contains("401"));
        assert_eq!(error.status, Some(401));
    }

    #[test]
    fn test_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let error = EventsError::with_source(ErrorCode::NetworkError, "failed", io);
        assert!(error.source.is_some());
        assert!(error.is_network_error());
        assert!(!error.is_config_error());
    }
}
