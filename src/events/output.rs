//! JSON encoding of analytics batches.

use serde_json::{json, Map, Value};

use super::config::EventsConfiguration;
use super::event::Event;
use super::summarizer::EventSummary;
use crate::error::{ErrorCode, EventsError, Result};
use crate::types::{AttributeRef, Context, SingleContext};

/// Serializes events and the summary into the payload the collection endpoint accepts.
#[derive(Debug, Clone)]
pub struct EventOutputFormatter {
    all_attributes_private: bool,
    private_attributes: Vec<AttributeRef>,
}

impl EventOutputFormatter {
    pub fn new(config: &EventsConfiguration) -> Self {
        Self {
            all_attributes_private: config.all_attributes_private,
            private_attributes: config.private_attributes.clone(),
        }
    }

    /// Encode a batch. Returns the payload and the number of events written.
    ///
    /// Events with an invalid context are left out and not counted.
    pub fn write_output_events(
        &self,
        events: &[Event],
        summary: &EventSummary,
    ) -> Result<(Vec<u8>, usize)> {
        let mut out: Vec<Value> = events
            .iter()
            .filter_map(|event| self.output_event(event))
            .collect();
        if !summary.is_empty() {
            out.push(summary_event(summary));
        }
        let count = out.len();
        let bytes = serde_json::to_vec(&out).map_err(|e| {
            EventsError::with_source(
                ErrorCode::EventSerializationFailed,
                "Failed to serialize event batch",
                e,
            )
        })?;
        Ok((bytes, count))
    }

    fn output_event(&self, event: &Event) -> Option<Value> {
        if !event.context().is_valid() {
            tracing::debug!("Skipping {} event with invalid context", event.kind_name());
            return None;
        }

        let mut obj = Map::new();
        obj.insert("kind".to_string(), json!(event.kind_name()));
        obj.insert("creationDate".to_string(), json!(event.creation_date()));

        match event {
            Event::FeatureRequest(fe) => {
                obj.insert("key".to_string(), json!(fe.key));
                obj.insert(
                    "context".to_string(),
                    self.format_context(&fe.context, !fe.debug),
                );
                if let Some(version) = fe.version {
                    obj.insert("version".to_string(), json!(version));
                }
                if let Some(variation) = fe.variation {
                    obj.insert("variation".to_string(), json!(variation));
                }
                put_value(&mut obj, "value", &fe.value);
                put_value(&mut obj, "default", &fe.default_value);
                if let Some(ref prereq_of) = fe.prereq_of {
                    obj.insert("prereqOf".to_string(), json!(prereq_of));
                }
                if let Some(ref reason) = fe.reason {
                    obj.insert("reason".to_string(), json!(reason));
                }
            }
            Event::Identify(e) => {
                obj.insert("context".to_string(), self.format_context(&e.context, false));
            }
            Event::Index(e) => {
                obj.insert("context".to_string(), self.format_context(&e.context, false));
            }
            Event::Custom(ce) => {
                obj.insert("key".to_string(), json!(ce.key));
                obj.insert("contextKeys".to_string(), context_keys(&ce.context));
                if let Some(ref data) = ce.data {
                    put_value(&mut obj, "data", data);
                }
                if let Some(metric) = ce.metric_value {
                    obj.insert("metricValue".to_string(), json!(metric));
                }
            }
        }
        Some(Value::Object(obj))
    }

    /// Context JSON with private attributes removed.
    ///
    /// With `redact_anonymous`, anonymous contexts have every optional attribute removed.
    pub fn format_context(&self, context: &Context, redact_anonymous: bool) -> Value {
        match context {
            Context::Single(single) => {
                let mut obj = self.format_single(single, redact_anonymous);
                let mut with_kind = Map::new();
                with_kind.insert("kind".to_string(), json!(single.kind));
                with_kind.append(&mut obj);
                Value::Object(with_kind)
            }
            Context::Multi(members) => {
                let mut obj = Map::new();
                obj.insert("kind".to_string(), json!("multi"));
                for member in members {
                    obj.insert(
                        member.kind.clone(),
                        Value::Object(self.format_single(member, redact_anonymous)),
                    );
                }
                Value::Object(obj)
            }
        }
    }

    fn format_single(&self, context: &SingleContext, redact_anonymous: bool) -> Map<String, Value> {
        let mut obj = Map::new();
        obj.insert("key".to_string(), json!(context.key));
        if context.anonymous {
            obj.insert("anonymous".to_string(), json!(true));
        }

        let mut attributes = context.attributes.clone();
        let mut redacted: Vec<String> = Vec::new();

        if self.all_attributes_private || (redact_anonymous && context.anonymous) {
            redacted.extend(attributes.keys().cloned());
            attributes.clear();
        } else {
            for reference in self
                .private_attributes
                .iter()
                .chain(context.private_attributes.iter())
            {
                if redacted.iter().any(|r| r == reference.as_str()) {
                    continue;
                }
                if remove_path(&mut attributes, reference) {
                    redacted.push(reference.as_str().to_string());
                }
            }
        }

        obj.extend(attributes);
        if !redacted.is_empty() {
            obj.insert(
                "_meta".to_string(),
                json!({ "redactedAttributes": redacted }),
            );
        }
        obj
    }
}

fn remove_path(attributes: &mut Map<String, Value>, reference: &AttributeRef) -> bool {
    if !reference.is_valid() {
        return false;
    }
    let components = reference.components();
    let Some((last, parents)) = components.split_last() else {
        return false;
    };
    let mut current = attributes;
    for name in parents {
        match current.get_mut(name) {
            Some(Value::Object(inner)) => current = inner,
            _ => return false,
        }
    }
    current.remove(last).is_some()
}

fn put_value(obj: &mut Map<String, Value>, name: &str, value: &Value) {
    if !value.is_null() {
        obj.insert(name.to_string(), value.clone());
    }
}

fn context_keys(context: &Context) -> Value {
    let keys: Map<String, Value> = context
        .individual_contexts()
        .iter()
        .map(|c| (c.kind.clone(), json!(c.key)))
        .collect();
    Value::Object(keys)
}

fn summary_event(summary: &EventSummary) -> Value {
    let mut features = Map::new();
    for (key, info) in &summary.features {
        let counters: Vec<Value> = info
            .counters
            .iter()
            .map(|((version, variation), counter)| {
                let mut c = Map::new();
                if let Some(variation) = variation {
                    c.insert("variation".to_string(), json!(variation));
                }
                match version {
                    Some(version) => c.insert("version".to_string(), json!(version)),
                    None => c.insert("unknown".to_string(), json!(true)),
                };
                put_value(&mut c, "value", &counter.value);
                c.insert("count".to_string(), json!(counter.count));
                Value::Object(c)
            })
            .collect();

        let mut flag = Map::new();
        put_value(&mut flag, "default", &info.default_value);
        flag.insert("contextKinds".to_string(), json!(info.context_kinds));
        flag.insert("counters".to_string(), Value::Array(counters));
        features.insert(key.clone(), Value::Object(flag));
    }

    json!({
        "kind": "summary",
        "startDate": summary.start_date,
        "endDate": summary.end_date,
        "features": features,
    })
}
