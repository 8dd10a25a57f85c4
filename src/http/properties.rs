//! Transport settings shared by every request the event sender makes.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Proxy, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::helpers::is_ascii_header_value;
use crate::error::{ErrorCode, EventsError, Result};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default socket (whole-request) timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Hook the host uses to rewrite default headers before each request.
pub type HeadersTransformer = Arc<dyn Fn(&mut HashMap<String, String>) + Send + Sync>;

/// Proxy settings with optional basic authentication.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// HTTP configuration bundle for event delivery.
///
/// Either wraps a client supplied by the host, which keeps ownership of it, or describes
/// how to build a private client that the sender owns.
#[derive(Clone)]
pub struct HttpProperties {
    connect_timeout: Duration,
    socket_timeout: Duration,
    default_headers: HashMap<String, String>,
    headers_transformer: Option<HeadersTransformer>,
    proxy: Option<ProxySettings>,
    root_certificates: Vec<Certificate>,
    shared_client: Option<Client>,
}

impl std::fmt::Debug for HttpProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProperties")
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .field("default_headers", &self.default_headers.keys().collect::<Vec<_>>())
            .field("has_headers_transformer", &self.headers_transformer.is_some())
            .field("proxy", &self.proxy.as_ref().map(|p| p.url.as_str()))
            .field("root_certificates", &self.root_certificates.len())
            .field("shared_client", &self.shared_client.is_some())
            .finish()
    }
}

impl Default for HttpProperties {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HttpProperties {
    pub fn builder() -> HttpPropertiesBuilder {
        HttpPropertiesBuilder::default()
    }

    /// Properties that reuse a client owned by the host.
    pub fn with_shared_client(
        client: Client,
        default_headers: HashMap<String, String>,
        headers_transformer: Option<HeadersTransformer>,
    ) -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            default_headers,
            headers_transformer,
            proxy: None,
            root_certificates: Vec::new(),
            shared_client: Some(client),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub fn default_headers(&self) -> &HashMap<String, String> {
        &self.default_headers
    }

    pub fn headers_transformer(&self) -> Option<&HeadersTransformer> {
        self.headers_transformer.as_ref()
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn shared_client(&self) -> Option<&Client> {
        self.shared_client.as_ref()
    }

    /// Whether a sender built from these properties owns its client.
    pub fn owns_client(&self) -> bool {
        self.shared_client.is_none()
    }

    /// Default headers after the host's transformer, if any, has been applied.
    pub fn transformed_default_headers(&self) -> HashMap<String, String> {
        let mut headers = self.default_headers.clone();
        if let Some(ref transform) = self.headers_transformer {
            transform(&mut headers);
        }
        headers
    }

    /// Converts the transformed default headers into a request header map.
    ///
    /// Headers with invalid names or non-ASCII values are skipped with a warning.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in self.transformed_default_headers() {
            if !is_ascii_header_value(&value) {
                tracing::warn!("Skipping header {} with non-ASCII value", name);
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(n), Ok(v)) => {
                    map.insert(n, v);
                }
                _ => tracing::warn!("Skipping invalid header {}", name),
            }
        }
        map
    }

    /// Returns the shared client, or builds a new one from these settings.
    pub fn to_client(&self) -> Result<Client> {
        if let Some(ref client) = self.shared_client {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.socket_timeout)
            .pool_idle_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(5);

        if let Some(ref settings) = self.proxy {
            let mut proxy = Proxy::all(settings.url.clone()).map_err(|e| {
                EventsError::with_source(ErrorCode::ConfigInvalidProxy, "Invalid proxy URL", e)
            })?;
            if let Some(ref username) = settings.username {
                proxy = proxy.basic_auth(username, settings.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(proxy);
        }

        for cert in &self.root_certificates {
            builder = builder.add_root_certificate(cert.clone());
        }

        builder.build().map_err(|e| {
            EventsError::with_source(
                ErrorCode::HttpClientBuildFailed,
                "Failed to create HTTP client",
                e,
            )
        })
    }
}

/// Builder for HttpProperties.
#[derive(Default)]
pub struct HttpPropertiesBuilder {
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    default_headers: HashMap<String, String>,
    headers_transformer: Option<HeadersTransformer>,
    proxy: Option<ProxySettings>,
    root_certificates: Vec<Certificate>,
}

impl HttpPropertiesBuilder {
    /// Set the connect timeout. Zero falls back to the default.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the socket timeout. Zero falls back to the default.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers.extend(headers);
        self
    }

    pub fn headers_transformer(
        mut self,
        transformer: impl Fn(&mut HashMap<String, String>) + Send + Sync + 'static,
    ) -> Self {
        self.headers_transformer = Some(Arc::new(transformer));
        self
    }

    pub fn proxy(mut self, url: Url) -> Self {
        self.proxy = Some(ProxySettings {
            url,
            username: None,
            password: None,
        });
        self
    }

    /// Basic credentials for the proxy. Ignored unless a proxy is set.
    pub fn proxy_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        if let Some(ref mut proxy) = self.proxy {
            proxy.username = Some(username.into());
            proxy.password = Some(password.into());
        }
        self
    }

    /// Trust an extra root certificate given in PEM form.
    pub fn root_certificate_pem(mut self, pem: &[u8]) -> Result<Self> {
        let cert = Certificate::from_pem(pem).map_err(|e| {
            EventsError::with_source(
                ErrorCode::ConfigInvalidCertificate,
                "Invalid PEM certificate",
                e,
            )
        })?;
        self.root_certificates.push(cert);
        Ok(self)
    }

    pub fn build(self) -> HttpProperties {
        let non_zero = |d: Option<Duration>, default: Duration| match d {
            Some(d) if !d.is_zero() => d,
            _ => default,
        };
        HttpProperties {
            connect_timeout: non_zero(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT),
            socket_timeout: non_zero(self.socket_timeout, DEFAULT_SOCKET_TIMEOUT),
            default_headers: self.default_headers,
            headers_transformer: self.headers_transformer,
            proxy: self.proxy,
            root_certificates: self.root_certificates,
            shared_client: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeouts_use_defaults() {
        let props = HttpProperties::builder()
            .connect_timeout(Duration::ZERO)
            .socket_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(props.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(props.socket_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_transformer_applies_to_copy() {
        let props = HttpProperties::builder()
            .header("Authorization", "sdk_key")
            .headers_transformer(|h| {
                h.insert("X-Extra".to_string(), "1".to_string());
                h.remove("Authorization");
            })
            .build();

        let transformed = props.transformed_default_headers();
        assert_eq!(transformed.get("X-Extra").map(String::as_str), Some("1"));
        assert!(!transformed.contains_key("Authorization"));
        assert!(props.default_headers().contains_key("Authorization"));
    }

    #[test]
    fn test_header_map_skips_non_ascii() {
        let props = HttpProperties::builder()
            .header("X-Good", "yes")
            .header("X-Bad", "n\u{f6}")
            .build();
        let map = props.to_header_map();
        assert_eq!(map.get("x-good").unwrap(), "yes");
        assert!(map.get("x-bad").is_none());
    }

    #[test]
    fn test_proxy_auth_requires_proxy() {
        let props = HttpProperties::builder().proxy_auth("u", "p").build();
        assert!(props.proxy().is_none());

        let props = HttpProperties::builder()
            .proxy(Url::parse("http://proxy.test:8080").unwrap())
            .proxy_auth("u", "p")
            .build();
        assert_eq!(props.proxy().unwrap().username.as_deref(), Some("u"));
        assert!(props.to_client().is_ok());
    }

    #[test]
    fn test_shared_client_is_not_owned() {
        let props = HttpProperties::with_shared_client(Client::new(), HashMap::new(), None);
        assert!(!props.owns_client());
        assert!(props.to_client().is_ok());
        assert!(HttpProperties::default().owns_client());
    }
}
