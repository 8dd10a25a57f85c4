//! Diagnostic statistics accumulated between snapshots.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::event::now_millis;

/// Header through which a wrapper library reports `name/version`.
pub const WRAPPER_HEADER: &str = "X-FlagKit-Wrapper";

/// JSON type a diagnostic configuration property must have to be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPropertyType {
    Boolean,
    Integer,
    String,
}

/// Configuration properties recognized in the diagnostic-init payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticConfigProperty {
    AllAttributesPrivate,
    BackgroundPollingDisabled,
    BackgroundPollingIntervalMillis,
    ConnectTimeoutMillis,
    CustomBaseUri,
    CustomEventsUri,
    CustomStreamUri,
    DataStoreType,
    DiagnosticRecordingIntervalMillis,
    EvaluationReasonsRequested,
    EventsCapacity,
    EventsFlushIntervalMillis,
    Offline,
    PollingIntervalMillis,
    ReconnectTimeMillis,
    SamplingInterval,
    SocketTimeoutMillis,
    StartWaitMillis,
    StreamingDisabled,
    UseReport,
    UserKeysCapacity,
    UserKeysFlushIntervalMillis,
    UsingProxy,
    UsingProxyAuthenticator,
}

impl DiagnosticConfigProperty {
    pub const ALL: [DiagnosticConfigProperty; 24] = [
        Self::AllAttributesPrivate,
        Self::BackgroundPollingDisabled,
        Self::BackgroundPollingIntervalMillis,
        Self::ConnectTimeoutMillis,
        Self::CustomBaseUri,
        Self::CustomEventsUri,
        Self::CustomStreamUri,
        Self::DataStoreType,
        Self::DiagnosticRecordingIntervalMillis,
        Self::EvaluationReasonsRequested,
        Self::EventsCapacity,
        Self::EventsFlushIntervalMillis,
        Self::Offline,
        Self::PollingIntervalMillis,
        Self::ReconnectTimeMillis,
        Self::SamplingInterval,
        Self::SocketTimeoutMillis,
        Self::StartWaitMillis,
        Self::StreamingDisabled,
        Self::UseReport,
        Self::UserKeysCapacity,
        Self::UserKeysFlushIntervalMillis,
        Self::UsingProxy,
        Self::UsingProxyAuthenticator,
    ];

    /// Property name as it appears in the payload.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AllAttributesPrivate => "allAttributesPrivate",
            Self::BackgroundPollingDisabled => "backgroundPollingDisabled",
            Self::BackgroundPollingIntervalMillis => "backgroundPollingIntervalMillis",
            Self::ConnectTimeoutMillis => "connectTimeoutMillis",
            Self::CustomBaseUri => "customBaseURI",
            Self::CustomEventsUri => "customEventsURI",
            Self::CustomStreamUri => "customStreamURI",
            Self::DataStoreType => "dataStoreType",
            Self::DiagnosticRecordingIntervalMillis => "diagnosticRecordingIntervalMillis",
            Self::EvaluationReasonsRequested => "evaluationReasonsRequested",
            Self::EventsCapacity => "eventsCapacity",
            Self::EventsFlushIntervalMillis => "eventsFlushIntervalMillis",
            Self::Offline => "offline",
            Self::PollingIntervalMillis => "pollingIntervalMillis",
            Self::ReconnectTimeMillis => "reconnectTimeMillis",
            Self::SamplingInterval => "samplingInterval",
            Self::SocketTimeoutMillis => "socketTimeoutMillis",
            Self::StartWaitMillis => "startWaitMillis",
            Self::StreamingDisabled => "streamingDisabled",
            Self::UseReport => "useReport",
            Self::UserKeysCapacity => "userKeysCapacity",
            Self::UserKeysFlushIntervalMillis => "userKeysFlushIntervalMillis",
            Self::UsingProxy => "usingProxy",
            Self::UsingProxyAuthenticator => "usingProxyAuthenticator",
        }
    }

    pub fn property_type(&self) -> ConfigPropertyType {
        match self {
            Self::AllAttributesPrivate
            | Self::BackgroundPollingDisabled
            | Self::CustomBaseUri
            | Self::CustomEventsUri
            | Self::CustomStreamUri
            | Self::EvaluationReasonsRequested
            | Self::Offline
            | Self::StreamingDisabled
            | Self::UseReport
            | Self::UsingProxy
            | Self::UsingProxyAuthenticator => ConfigPropertyType::Boolean,
            Self::DataStoreType => ConfigPropertyType::String,
            _ => ConfigPropertyType::Integer,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.property_type() {
            ConfigPropertyType::Boolean => value.is_boolean(),
            ConfigPropertyType::Integer => value.is_i64() || value.is_u64(),
            ConfigPropertyType::String => value.is_string(),
        }
    }
}

/// Static description of the SDK, reused for every diagnostic payload.
#[derive(Debug, Clone, Default)]
pub struct SdkDiagnosticParams {
    pub sdk_key: String,
    pub sdk_name: String,
    pub sdk_version: String,
    pub platform_name: String,
    /// Extra properties merged into the `platform` object.
    pub extra_platform_data: Option<Value>,
    /// Default request headers; only the wrapper header is read.
    pub default_headers: HashMap<String, String>,
    /// Objects whose recognized properties form the `configuration` object.
    pub config_properties: Vec<Value>,
}

impl SdkDiagnosticParams {
    pub fn new(
        sdk_key: impl Into<String>,
        sdk_name: impl Into<String>,
        sdk_version: impl Into<String>,
        platform_name: impl Into<String>,
    ) -> Self {
        Self {
            sdk_key: sdk_key.into(),
            sdk_name: sdk_name.into(),
            sdk_version: sdk_version.into(),
            platform_name: platform_name.into(),
            ..Default::default()
        }
    }

    pub fn extra_platform_data(mut self, data: Value) -> Self {
        self.extra_platform_data = Some(data);
        self
    }

    pub fn default_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn config_properties(mut self, properties: Vec<Value>) -> Self {
        self.config_properties = properties;
        self
    }
}

/// Identifies one SDK instance across its diagnostic payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticId {
    pub diagnostic_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_key_suffix: Option<String>,
}

impl DiagnosticId {
    pub fn new(sdk_key: &str) -> Self {
        let suffix = if sdk_key.is_empty() {
            None
        } else {
            let chars: Vec<char> = sdk_key.chars().collect();
            let start = chars.len().saturating_sub(6);
            Some(chars[start..].iter().collect())
        };
        Self {
            diagnostic_id: uuid::Uuid::new_v4().to_string(),
            sdk_key_suffix: suffix,
        }
    }
}

/// One stream connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInit {
    pub timestamp: i64,
    pub duration_millis: u64,
    pub failed: bool,
}

/// A serialized diagnostic payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    pub init_event: bool,
    pub value: Value,
}

impl DiagnosticEvent {
    fn base(kind: &str, creation_date: i64, id: &DiagnosticId) -> Map<String, Value> {
        let mut obj = Map::new();
        obj.insert("kind".to_string(), json!(kind));
        obj.insert("creationDate".to_string(), json!(creation_date));
        obj.insert("id".to_string(), json!(id));
        obj
    }

    pub fn kind(&self) -> Option<&str> {
        self.value.get("kind").and_then(Value::as_str)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.value)
    }
}

/// Counters and timers collected between diagnostic snapshots.
///
/// All recording methods may be called concurrently with each other and with
/// [`create_event_and_reset`](Self::create_event_and_reset).
pub struct DiagnosticStore {
    diagnostic_id: DiagnosticId,
    creation_date: i64,
    data_since_date: AtomicI64,
    events_in_last_batch: AtomicU64,
    stream_inits: Mutex<Vec<StreamInit>>,
    init_event: DiagnosticEvent,
}

impl DiagnosticStore {
    pub fn new(params: SdkDiagnosticParams) -> Self {
        let diagnostic_id = DiagnosticId::new(&params.sdk_key);
        let creation_date = now_millis();
        let init_event = DiagnosticEvent {
            init_event: true,
            value: Self::build_init(&params, creation_date, &diagnostic_id),
        };
        Self {
            diagnostic_id,
            creation_date,
            data_since_date: AtomicI64::new(creation_date),
            events_in_last_batch: AtomicU64::new(0),
            stream_inits: Mutex::new(Vec::new()),
            init_event,
        }
    }

    fn build_init(params: &SdkDiagnosticParams, creation_date: i64, id: &DiagnosticId) -> Value {
        let mut sdk = Map::new();
        sdk.insert("name".to_string(), json!(params.sdk_name));
        sdk.insert("version".to_string(), json!(params.sdk_version));
        let wrapper = params
            .default_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(WRAPPER_HEADER))
            .map(|(_, value)| value.as_str());
        if let Some(wrapper) = wrapper {
            match wrapper.split_once('/') {
                Some((name, version)) => {
                    sdk.insert("wrapperName".to_string(), json!(name));
                    sdk.insert("wrapperVersion".to_string(), json!(version));
                }
                None => {
                    sdk.insert("wrapperName".to_string(), json!(wrapper));
                }
            }
        }

        let mut platform = Map::new();
        platform.insert("name".to_string(), json!(params.platform_name));
        if let Some(Value::Object(extra)) = &params.extra_platform_data {
            for (k, v) in extra {
                platform.insert(k.clone(), v.clone());
            }
        }

        let mut configuration = Map::new();
        for props in &params.config_properties {
            let Value::Object(props) = props else {
                continue;
            };
            for (name, value) in props {
                match DiagnosticConfigProperty::from_name(name) {
                    Some(prop) if prop.accepts(value) => {
                        configuration.insert(name.clone(), value.clone());
                    }
                    _ => tracing::debug!("Ignoring diagnostic configuration property {}", name),
                }
            }
        }

        let mut obj = DiagnosticEvent::base("diagnostic-init", creation_date, id);
        obj.insert("sdk".to_string(), Value::Object(sdk));
        obj.insert("configuration".to_string(), Value::Object(configuration));
        obj.insert("platform".to_string(), Value::Object(platform));
        Value::Object(obj)
    }

    pub fn diagnostic_id(&self) -> &DiagnosticId {
        &self.diagnostic_id
    }

    pub fn creation_date(&self) -> i64 {
        self.creation_date
    }

    /// The one-time diagnostic-init event. Built once at construction.
    pub fn init_event(&self) -> DiagnosticEvent {
        self.init_event.clone()
    }

    /// When the current statistics period started.
    pub fn data_since_date(&self) -> i64 {
        self.data_since_date.load(Ordering::SeqCst)
    }

    pub fn record_events_in_batch(&self, count: u64) {
        self.events_in_last_batch.store(count, Ordering::SeqCst);
    }

    pub fn record_stream_init(&self, timestamp: i64, duration_millis: u64, failed: bool) {
        self.stream_inits.lock().push(StreamInit {
            timestamp,
            duration_millis,
            failed,
        });
    }

    /// Snapshot the current statistics and start a new period.
    ///
    /// `dropped_events` and `deduplicated_contexts` are tracked by the caller.
    pub fn create_event_and_reset(
        &self,
        dropped_events: u64,
        deduplicated_contexts: u64,
    ) -> DiagnosticEvent {
        let now = now_millis();
        let events_in_last_batch = self.events_in_last_batch.swap(0, Ordering::SeqCst);
        let since = self.data_since_date.swap(now, Ordering::SeqCst);
        let stream_inits = std::mem::take(&mut *self.stream_inits.lock());

        let mut obj = DiagnosticEvent::base("diagnostic", now, &self.diagnostic_id);
        obj.insert("dataSinceDate".to_string(), json!(since));
        obj.insert("droppedEvents".to_string(), json!(dropped_events));
        obj.insert("deduplicatedUsers".to_string(), json!(deduplicated_contexts));
        obj.insert("eventsInLastBatch".to_string(), json!(events_in_last_batch));
        obj.insert("streamInits".to_string(), json!(stream_inits));

        DiagnosticEvent {
            init_event: false,
            value: Value::Object(obj),
        }
    }
}

impl std::fmt::Debug for DiagnosticStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticStore")
            .field("diagnostic_id", &self.diagnostic_id)
            .field("data_since_date", &self.data_since_date())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_store() -> DiagnosticStore {
        DiagnosticStore::new(SdkDiagnosticParams::new(
            "key-abcdefg",
            "fake-sdk",
            "1.2.3",
            "fake-platform",
        ))
    }

    #[test]
    fn test_init_event_basics() {
        let now = now_millis();
        let store = simple_store();
        let init = store.init_event();
        assert!(init.init_event);
        assert_eq!(init.kind(), Some("diagnostic-init"));
        assert!(init.value["creationDate"].as_i64().unwrap() >= now);
        assert_eq!(init.value["id"]["sdkKeySuffix"], "bcdefg");
        assert!(init.value["id"]["diagnosticId"].is_string());
        assert_eq!(init.value["sdk"]["name"], "fake-sdk");
        assert!(init.value["sdk"].get("wrapperName").is_none());
    }

    #[test]
    fn test_wrapper_header() {
        let mut headers = HashMap::new();
        headers.insert(WRAPPER_HEADER.to_string(), "Scala/0.1".to_string());
        let store = DiagnosticStore::new(
            SdkDiagnosticParams::new("k", "sdk", "1", "p").default_headers(headers),
        );
        let sdk = &store.init_event().value["sdk"];
        assert_eq!(sdk["wrapperName"], "Scala");
        assert_eq!(sdk["wrapperVersion"], "0.1");
    }

    #[test]
    fn test_configuration_filtered_by_type() {
        let store = DiagnosticStore::new(
            SdkDiagnosticParams::new("k", "sdk", "1", "p").config_properties(vec![
                json!({"eventsCapacity": 1000, "userKeysCapacity": 2000, "allAttributesPrivate": "yes"}),
                json!("abcdef"),
                json!({"dataStoreType": "custom", "notAProperty": 1}),
            ]),
        );
        assert_eq!(
            store.init_event().value["configuration"],
            json!({"eventsCapacity": 1000, "userKeysCapacity": 2000, "dataStoreType": "custom"})
        );
    }

    #[test]
    fn test_platform_data_merged() {
        let store = DiagnosticStore::new(
            SdkDiagnosticParams::new("k", "sdk", "1", "fake-platform")
                .extra_platform_data(json!({"osName": "Linux"})),
        );
        let platform = &store.init_event().value["platform"];
        assert_eq!(platform["name"], "fake-platform");
        assert_eq!(platform["osName"], "Linux");
    }

    #[test]
    fn test_snapshot_and_reset() {
        let store = simple_store();
        let start = store.data_since_date();
        store.record_events_in_batch(100);
        store.record_stream_init(1000, 200, false);

        std::thread::sleep(std::time::Duration::from_millis(2));
        let stats = store.create_event_and_reset(10, 15);
        assert!(!stats.init_event);
        assert_eq!(stats.kind(), Some("diagnostic"));
        assert_eq!(stats.value["dataSinceDate"], start);
        assert_eq!(stats.value["droppedEvents"], 10);
        assert_eq!(stats.value["deduplicatedUsers"], 15);
        assert_eq!(stats.value["eventsInLastBatch"], 100);
        assert_eq!(
            stats.value["streamInits"],
            json!([{"timestamp": 1000, "durationMillis": 200, "failed": false}])
        );
        assert!(store.data_since_date() > start);

        let second = store.create_event_and_reset(0, 0);
        assert_eq!(second.value["eventsInLastBatch"], 0);
        assert_eq!(second.value["streamInits"], json!([]));
        assert!(second.value["dataSinceDate"].as_i64().unwrap() > start);
    }
}
