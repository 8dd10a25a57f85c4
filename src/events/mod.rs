mod config;
mod deduplicator;
mod diagnostics;
mod event;
mod output;
mod processor;
mod sampler;
mod sender;
mod summarizer;

pub use config::{
    EventsConfiguration, EventsConfigurationBuilder, DEFAULT_BACKGROUND_FLUSH_INTERVAL,
    DEFAULT_CAPACITY, DEFAULT_CONTEXT_KEYS_CAPACITY, DEFAULT_CONTEXT_KEYS_FLUSH_INTERVAL,
    DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL, DEFAULT_EVENTS_URI, DEFAULT_EVENT_SENDING_POOL_SIZE,
    DEFAULT_FLUSH_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, MIN_DIAGNOSTIC_RECORDING_INTERVAL,
};
pub use deduplicator::{ContextDeduplicator, DefaultContextDeduplicator};
pub use diagnostics::{
    ConfigPropertyType, DiagnosticConfigProperty, DiagnosticEvent, DiagnosticId, DiagnosticStore,
    SdkDiagnosticParams, StreamInit, WRAPPER_HEADER,
};
pub use event::{now_millis, CustomEvent, Event, FeatureRequestEvent, IdentifyEvent, IndexEvent};
pub use output::EventOutputFormatter;
pub use processor::{DefaultEventProcessor, EventProcessor, EventProcessorBuilder};
pub use sampler::should_sample;
pub use sender::{
    DefaultEventSender, EventSender, SendResult, ANALYTICS_PATH, DEFAULT_RETRY_DELAY,
    DIAGNOSTIC_PATH, EVENT_COUNT_HEADER, EVENT_SCHEMA_HEADER, EVENT_SCHEMA_VERSION,
    PAYLOAD_ID_HEADER,
};
pub use summarizer::{CounterValue, EventSummarizer, EventSummary, FlagInfo};
