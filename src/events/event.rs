//! Analytics events accepted by the event processor.

use serde_json::Value;

use crate::types::{Context, EvaluationReason};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Records that a context's identity should be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyEvent {
    pub creation_date: i64,
    pub context: Context,
    pub sampling_ratio: u64,
}

/// Emitted by the processor the first time a context is seen on a non-identify event.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEvent {
    pub creation_date: i64,
    pub context: Context,
}

/// An application-defined metric or conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub creation_date: i64,
    pub context: Context,
    pub key: String,
    pub data: Option<Value>,
    pub metric_value: Option<f64>,
    pub sampling_ratio: u64,
}

/// The outcome of one flag evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequestEvent {
    pub creation_date: i64,
    pub context: Context,
    pub key: String,
    pub variation: Option<i32>,
    pub version: Option<i32>,
    pub value: Value,
    pub default_value: Value,
    pub reason: Option<EvaluationReason>,
    /// Key of the flag this evaluation was a prerequisite of.
    pub prereq_of: Option<String>,
    pub track_events: bool,
    pub debug_events_until_date: Option<i64>,
    pub debug: bool,
    pub sampling_ratio: u64,
    pub exclude_from_summaries: bool,
}

impl FeatureRequestEvent {
    pub fn new(context: Context, key: impl Into<String>, value: Value) -> Self {
        Self {
            creation_date: now_millis(),
            context,
            key: key.into(),
            variation: None,
            version: None,
            value,
            default_value: Value::Null,
            reason: None,
            prereq_of: None,
            track_events: false,
            debug_events_until_date: None,
            debug: false,
            sampling_ratio: 1,
            exclude_from_summaries: false,
        }
    }

    pub fn variation(mut self, variation: i32) -> Self {
        self.variation = Some(variation);
        self
    }

    pub fn version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    pub fn reason(mut self, reason: EvaluationReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn prereq_of(mut self, key: impl Into<String>) -> Self {
        self.prereq_of = Some(key.into());
        self
    }

    pub fn track_events(mut self, track: bool) -> Self {
        self.track_events = track;
        self
    }

    pub fn debug_events_until_date(mut self, millis: i64) -> Self {
        self.debug_events_until_date = Some(millis);
        self
    }

    pub fn sampling_ratio(mut self, ratio: u64) -> Self {
        self.sampling_ratio = ratio;
        self
    }

    pub fn exclude_from_summaries(mut self, exclude: bool) -> Self {
        self.exclude_from_summaries = exclude;
        self
    }

    /// A copy of this event marked for debugging.
    pub fn to_debug_event(&self) -> Self {
        Self {
            debug: true,
            ..self.clone()
        }
    }
}

/// An analytics event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Identify(IdentifyEvent),
    Index(IndexEvent),
    Custom(CustomEvent),
    FeatureRequest(FeatureRequestEvent),
}

impl Event {
    /// An identify event created now.
    pub fn identify(context: Context) -> Self {
        Event::Identify(IdentifyEvent {
            creation_date: now_millis(),
            context,
            sampling_ratio: 1,
        })
    }

    /// A custom event created now.
    pub fn custom(
        context: Context,
        key: impl Into<String>,
        data: Option<Value>,
        metric_value: Option<f64>,
    ) -> Self {
        Event::Custom(CustomEvent {
            creation_date: now_millis(),
            context,
            key: key.into(),
            data,
            metric_value,
            sampling_ratio: 1,
        })
    }

    pub fn index(creation_date: i64, context: Context) -> Self {
        Event::Index(IndexEvent {
            creation_date,
            context,
        })
    }

    pub fn creation_date(&self) -> i64 {
        match self {
            Event::Identify(e) => e.creation_date,
            Event::Index(e) => e.creation_date,
            Event::Custom(e) => e.creation_date,
            Event::FeatureRequest(e) => e.creation_date,
        }
    }

    pub fn context(&self) -> &Context {
        match self {
            Event::Identify(e) => &e.context,
            Event::Index(e) => &e.context,
            Event::Custom(e) => &e.context,
            Event::FeatureRequest(e) => &e.context,
        }
    }

    /// One in `sampling_ratio` events of this kind are delivered. Index events are never sampled.
    pub fn sampling_ratio(&self) -> u64 {
        match self {
            Event::Identify(e) => e.sampling_ratio,
            Event::Index(_) => 1,
            Event::Custom(e) => e.sampling_ratio,
            Event::FeatureRequest(e) => e.sampling_ratio,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::Identify(_) => "identify",
            Event::Index(_) => "index",
            Event::Custom(_) => "custom",
            Event::FeatureRequest(e) if e.debug => "debug",
            Event::FeatureRequest(_) => "feature",
        }
    }
}

impl From<FeatureRequestEvent> for Event {
    fn from(event: FeatureRequestEvent) -> Self {
        Event::FeatureRequest(event)
    }
}

impl From<CustomEvent> for Event {
    fn from(event: CustomEvent) -> Self {
        Event::Custom(event)
    }
}

impl From<IdentifyEvent> for Event {
    fn from(event: IdentifyEvent) -> Self {
        Event::Identify(event)
    }
}
