//! Per-flag evaluation counters sent as one summary event per batch.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::Context;

/// Count of evaluations that produced one (version, variation) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterValue {
    pub value: Value,
    pub count: u64,
}

/// Counters for one flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagInfo {
    pub default_value: Value,
    pub context_kinds: BTreeSet<String>,
    /// Keyed by `(version, variation)`; `None` means unknown.
    pub counters: BTreeMap<(Option<i32>, Option<i32>), CounterValue>,
}

/// Accumulated counters plus the time range they cover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSummary {
    pub start_date: i64,
    pub end_date: i64,
    pub features: BTreeMap<String, FlagInfo>,
}

impl EventSummary {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn note_timestamp(&mut self, timestamp: i64) {
        if self.start_date == 0 || timestamp < self.start_date {
            self.start_date = timestamp;
        }
        if timestamp > self.end_date {
            self.end_date = timestamp;
        }
    }
}

/// Owned by the dispatcher task; not shared between threads.
#[derive(Debug, Default)]
pub struct EventSummarizer {
    summary: EventSummary,
}

impl EventSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn summarize_event(
        &mut self,
        timestamp: i64,
        flag_key: &str,
        version: Option<i32>,
        variation: Option<i32>,
        value: &Value,
        default_value: &Value,
        context: &Context,
    ) {
        let flag = self
            .summary
            .features
            .entry(flag_key.to_string())
            .or_insert_with(|| FlagInfo {
                default_value: default_value.clone(),
                context_kinds: BTreeSet::new(),
                counters: BTreeMap::new(),
            });

        for single in context.individual_contexts() {
            flag.context_kinds.insert(single.kind.clone());
        }

        flag.counters
            .entry((version, variation))
            .and_modify(|c| c.count += 1)
            .or_insert_with(|| CounterValue {
                value: value.clone(),
                count: 1,
            });

        self.summary.note_timestamp(timestamp);
    }

    /// Take the current summary and start a new one.
    pub fn take_summary(&mut self) -> EventSummary {
        std::mem::take(&mut self.summary)
    }

    /// Put back a summary that could not be delivered, merging anything counted since.
    pub fn restore(&mut self, previous: EventSummary) {
        if previous.is_empty() {
            return;
        }
        let newer = std::mem::replace(&mut self.summary, previous);
        if newer.is_empty() {
            return;
        }
        self.summary.note_timestamp(newer.start_date);
        self.summary.note_timestamp(newer.end_date);
        for (key, info) in newer.features {
            match self.summary.features.get_mut(&key) {
                None => {
                    self.summary.features.insert(key, info);
                }
                Some(existing) => {
                    existing.context_kinds.extend(info.context_kinds);
                    for (slot, counter) in info.counters {
                        existing
                            .counters
                            .entry(slot)
                            .and_modify(|c| c.count += counter.count)
                            .or_insert(counter);
                    }
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }

    pub fn clear(&mut self) {
        self.summary = EventSummary::default();
    }
}
