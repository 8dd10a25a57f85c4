//! FlagKit event delivery
//!
//! Analytics and diagnostic event pipeline shared by FlagKit SDKs. Flag evaluation code
//! hands events to an [`EventProcessor`]; the processor deduplicates context
//! announcements, summarizes evaluations, batches everything and posts it to the
//! events endpoint without ever blocking the caller.
//!
//! # Quick Start
//!
//! ```no_run
//! use flagkit_events::{
//!     Context, DiagnosticStore, Event, EventProcessor, EventProcessorBuilder,
//!     EventsConfiguration, FeatureRequestEvent, HttpProperties, SdkDiagnosticParams,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> flagkit_events::Result<()> {
//!     let config = EventsConfiguration::builder()
//!         .events_uri("https://events.flagkit.dev")
//!         .build()?;
//!
//!     let http = HttpProperties::builder()
//!         .header("Authorization", "sdk_your_key")
//!         .build();
//!
//!     let store = DiagnosticStore::new(SdkDiagnosticParams::new(
//!         "sdk_your_key",
//!         "flagkit-rust",
//!         "1.0.0",
//!         "rust",
//!     ));
//!
//!     let processor = EventProcessorBuilder::new(config)
//!         .http_properties(http)
//!         .diagnostic_store(Arc::new(store))
//!         .build()?;
//!
//!     let user = Context::new("user-123");
//!     processor.send_event(Event::identify(user.clone()));
//!     processor.send_event(
//!         FeatureRequestEvent::new(user, "dark-mode", serde_json::json!(true))
//!             .variation(0)
//!             .version(4)
//!             .track_events(true)
//!             .into(),
//!     );
//!
//!     processor.close().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod http;
pub mod types;

// Re-exports from types module
pub use types::{AttributeRef, Context, ContextBuilder, EvaluationReason, SingleContext};

// Re-exports from error module
pub use error::{ErrorCode, EventsError, Result};

// Re-exports from events module
pub use events::{
    ContextDeduplicator, CustomEvent, DefaultContextDeduplicator, DefaultEventProcessor,
    DefaultEventSender, DiagnosticConfigProperty, DiagnosticEvent, DiagnosticId, DiagnosticStore,
    Event, EventOutputFormatter, EventProcessor, EventProcessorBuilder, EventSender,
    EventSummarizer, EventSummary, EventsConfiguration, EventsConfigurationBuilder,
    FeatureRequestEvent, IdentifyEvent, IndexEvent, SdkDiagnosticParams, SendResult, StreamInit,
};

// Re-exports from http module
pub use http::{HeadersTransformer, HttpProperties, HttpPropertiesBuilder, ProxySettings, RetryPolicy};

/// SDK version reported in diagnostics by default.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
