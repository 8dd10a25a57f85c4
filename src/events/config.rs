use reqwest::Url;
use std::time::Duration;

use crate::error::{ErrorCode, EventsError, Result};
use crate::types::AttributeRef;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKGROUND_FLUSH_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_EVENT_SENDING_POOL_SIZE: usize = 5;
pub const DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(900);
pub const MIN_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CONTEXT_KEYS_CAPACITY: usize = 1000;
pub const DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EVENTS_URI: &str = "https://events.flagkit.dev";

/// Immutable event pipeline settings. Build a new one to change behavior.
#[derive(Debug, Clone)]
pub struct EventsConfiguration {
    /// Maximum number of events held between flushes.
    pub capacity: usize,
    pub flush_interval: Duration,
    /// Flush cadence while the host application is in the background.
    pub background_flush_interval: Duration,
    /// Maximum number of analytics payloads in flight at once.
    pub event_sending_pool_size: usize,
    pub diagnostic_recording_interval: Duration,
    pub context_keys_capacity: usize,
    pub context_keys_flush_interval: Duration,
    pub all_attributes_private: bool,
    pub private_attributes: Vec<AttributeRef>,
    /// Base URI; the sender appends its own path for each payload type.
    pub events_uri: Url,
    pub diagnostic_opt_out: bool,
    pub initially_offline: bool,
    pub initially_in_background: bool,
    /// Upper bound on how long `flush_blocking` and `close` wait.
    pub shutdown_timeout: Duration,
}

impl Default for EventsConfiguration {
    fn default() -> Self {
        EventsConfigurationBuilder::default().defaults()
    }
}

impl EventsConfiguration {
    pub fn builder() -> EventsConfigurationBuilder {
        EventsConfigurationBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(EventsError::config_error(
                ErrorCode::ConfigInvalidCapacity,
                "Event capacity must be at least 1",
            ));
        }

        if self.event_sending_pool_size == 0 {
            return Err(EventsError::config_error(
                ErrorCode::ConfigInvalidPoolSize,
                "Event sending pool size must be at least 1",
            ));
        }

        if self.flush_interval.is_zero() || self.background_flush_interval.is_zero() {
            return Err(EventsError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Flush intervals must be positive",
            ));
        }

        if self.diagnostic_recording_interval.is_zero()
            || self.context_keys_flush_interval.is_zero()
        {
            return Err(EventsError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Recording intervals must be positive",
            ));
        }

        if !matches!(self.events_uri.scheme(), "http" | "https") {
            return Err(EventsError::config_error(
                ErrorCode::ConfigInvalidUrl,
                format!("Unsupported events URI scheme: {}", self.events_uri.scheme()),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct EventsConfigurationBuilder {
    capacity: Option<usize>,
    flush_interval: Option<Duration>,
    background_flush_interval: Option<Duration>,
    event_sending_pool_size: Option<usize>,
    diagnostic_recording_interval: Option<Duration>,
    context_keys_capacity: Option<usize>,
    context_keys_flush_interval: Option<Duration>,
    all_attributes_private: bool,
    private_attributes: Vec<AttributeRef>,
    events_uri: Option<String>,
    diagnostic_opt_out: bool,
    initially_offline: bool,
    initially_in_background: bool,
    shutdown_timeout: Option<Duration>,
}

impl EventsConfigurationBuilder {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn background_flush_interval(mut self, interval: Duration) -> Self {
        self.background_flush_interval = Some(interval);
        self
    }

    pub fn event_sending_pool_size(mut self, size: usize) -> Self {
        self.event_sending_pool_size = Some(size);
        self
    }

    /// Set the diagnostic interval. Values below one minute are raised to one minute.
    pub fn diagnostic_recording_interval(mut self, interval: Duration) -> Self {
        self.diagnostic_recording_interval = Some(interval.max(MIN_DIAGNOSTIC_RECORDING_INTERVAL));
        self
    }

    pub fn context_keys_capacity(mut self, capacity: usize) -> Self {
        self.context_keys_capacity = Some(capacity);
        self
    }

    pub fn context_keys_flush_interval(mut self, interval: Duration) -> Self {
        self.context_keys_flush_interval = Some(interval);
        self
    }

    pub fn all_attributes_private(mut self, private: bool) -> Self {
        self.all_attributes_private = private;
        self
    }

    pub fn private_attribute(mut self, reference: impl Into<AttributeRef>) -> Self {
        self.private_attributes.push(reference.into());
        self
    }

    pub fn events_uri(mut self, uri: impl Into<String>) -> Self {
        self.events_uri = Some(uri.into());
        self
    }

    pub fn diagnostic_opt_out(mut self, opt_out: bool) -> Self {
        self.diagnostic_opt_out = opt_out;
        self
    }

    pub fn initially_offline(mut self, offline: bool) -> Self {
        self.initially_offline = offline;
        self
    }

    pub fn initially_in_background(mut self, in_background: bool) -> Self {
        self.initially_in_background = in_background;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    fn defaults(self) -> EventsConfiguration {
        EventsConfiguration {
            capacity: self.capacity.unwrap_or(DEFAULT_CAPACITY),
            flush_interval: self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
            background_flush_interval: self
                .background_flush_interval
                .unwrap_or(DEFAULT_BACKGROUND_FLUSH_INTERVAL),
            event_sending_pool_size: self
                .event_sending_pool_size
                .unwrap_or(DEFAULT_EVENT_SENDING_POOL_SIZE),
            diagnostic_recording_interval: self
                .diagnostic_recording_interval
                .unwrap_or(DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL),
            context_keys_capacity: self
                .context_keys_capacity
                .unwrap_or(DEFAULT_CONTEXT_KEYS_CAPACITY),
            context_keys_flush_interval: self
                .context_keys_flush_interval
                .unwrap_or(DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL),
            all_attributes_private: self.all_attributes_private,
            private_attributes: self.private_attributes,
            events_uri: Url::parse(DEFAULT_EVENTS_URI).expect("default events URI is valid"),
            diagnostic_opt_out: self.diagnostic_opt_out,
            initially_offline: self.initially_offline,
            initially_in_background: self.initially_in_background,
            shutdown_timeout: self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }

    /// Build and validate the configuration.
    pub fn build(mut self) -> Result<EventsConfiguration> {
        let uri = self.events_uri.take();
        let mut config = self.defaults();
        if let Some(uri) = uri {
            config.events_uri = Url::parse(&uri).map_err(|e| {
                EventsError::with_source(
                    ErrorCode::ConfigInvalidUrl,
                    format!("Invalid events URI: {}", uri),
                    e,
                )
            })?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventsConfiguration::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(config.event_sending_pool_size, 5);
        assert_eq!(config.events_uri.as_str(), "https://events.flagkit.dev/");
        assert!(!config.diagnostic_opt_out);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_diagnostic_interval_minimum() {
        let config = EventsConfiguration::builder()
            .diagnostic_recording_interval(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.diagnostic_recording_interval, MIN_DIAGNOSTIC_RECORDING_INTERVAL);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = EventsConfiguration::builder().capacity(0).build().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidCapacity);
    }

    #[test]
    fn test_invalid_uri_rejected() {
        let err = EventsConfiguration::builder()
            .events_uri("not a uri")
            .build()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidUrl);

        let err = EventsConfiguration::builder()
            .events_uri("ftp://events.test")
            .build()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidUrl);
    }
}
