//! The event processor: a bounded inbox, a dispatcher task that batches events,
//! and a small pool of concurrent deliveries.
//!
//! Producers never wait. Events go through a bounded channel and are dropped when it
//! is full. Control messages (flushes, diagnostics, shutdown) go through a separate
//! unbounded channel; before handling one, the dispatcher drains every event already
//! queued so that a flush always covers the events sent before it was requested.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use super::config::EventsConfiguration;
use super::deduplicator::{ContextDeduplicator, DefaultContextDeduplicator};
use super::diagnostics::{DiagnosticEvent, DiagnosticStore};
use super::event::{now_millis, Event};
use super::output::EventOutputFormatter;
use super::sampler::should_sample;
use super::sender::{DefaultEventSender, EventSender, SendResult};
use super::summarizer::EventSummarizer;
use crate::error::{ErrorCode, EventsError, Result};
use crate::http::HttpProperties;

/// The producer-facing surface of an event pipeline.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Queue an event. Never blocks; drops the event if the queue is full.
    fn send_event(&self, event: Event);

    /// Request a flush without waiting for it.
    fn flush_async(&self);

    /// Flush and wait for the resulting deliveries, bounded by the configured timeout.
    ///
    /// Returns false if the wait timed out or the processor is closed.
    async fn flush_blocking(&self) -> bool;

    /// While offline, events are still queued but nothing is sent.
    fn set_offline(&self, offline: bool);

    /// In the background, flushes use the slower background interval and
    /// periodic diagnostics are paused.
    fn set_in_background(&self, in_background: bool);

    /// Flush, stop all timers, wait for in-flight deliveries and release the sender.
    /// Calling it again does nothing.
    async fn close(&self);
}

enum Message {
    /// Flush the outbox. With a reply channel, answer once delivery has finished.
    Flush(Option<oneshot::Sender<()>>),
    FlushContexts,
    DiagnosticInit,
    DiagnosticStats,
    Shutdown(Option<oneshot::Sender<()>>),
}

#[derive(Default)]
struct Timers {
    flush: Option<(Duration, JoinHandle<()>)>,
    diagnostics: Option<JoinHandle<()>>,
    context_flush: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        if let Some((_, handle)) = self.flush.take() {
            handle.abort();
        }
        if let Some(handle) = self.diagnostics.take() {
            handle.abort();
        }
        if let Some(handle) = self.context_flush.take() {
            handle.abort();
        }
    }
}

/// State shared by the handle, the dispatcher and the delivery tasks.
struct Shared {
    config: EventsConfiguration,
    sender: Arc<dyn EventSender>,
    diagnostic_store: Option<Arc<DiagnosticStore>>,
    runtime: Handle,
    control_tx: mpsc::UnboundedSender<Message>,
    send_permits: Arc<Semaphore>,
    /// Set once close gives up waiting; in-flight deliveries stop at their next await.
    abandon_tx: watch::Sender<bool>,
    timers: Mutex<Timers>,
    offline: AtomicBool,
    in_background: AtomicBool,
    closed: AtomicBool,
    disabled: AtomicBool,
    diagnostic_init_sent: AtomicBool,
    inbox_dropped: AtomicU64,
    inbox_full_warned: AtomicBool,
    /// Latest server time seen, in epoch millis.
    last_known_past_time: AtomicI64,
}

impl Shared {
    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn diagnostics_paused(&self) -> bool {
        self.offline.load(Ordering::SeqCst) || self.in_background.load(Ordering::SeqCst)
    }

    fn post(&self, message: Message) -> bool {
        self.control_tx.send(message).is_ok()
    }

    fn spawn_ticker(&self, period: Duration, message: fn() -> Message) -> JoinHandle<()> {
        let tx = self.control_tx.clone();
        self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.send(message()).is_err() {
                    break;
                }
            }
        })
    }

    /// Start or stop timers to match the offline and background flags.
    fn update_scheduled_tasks(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let offline = self.offline.load(Ordering::SeqCst);
        let in_background = self.in_background.load(Ordering::SeqCst);
        let mut timers = self.timers.lock();

        let wanted = if offline {
            None
        } else if in_background {
            Some(self.config.background_flush_interval)
        } else {
            Some(self.config.flush_interval)
        };
        let current = timers.flush.as_ref().map(|(period, _)| *period);
        if wanted != current {
            if let Some((_, handle)) = timers.flush.take() {
                handle.abort();
            }
            if let Some(period) = wanted {
                tracing::debug!("Flushing events every {:?}", period);
                timers.flush = Some((period, self.spawn_ticker(period, || Message::Flush(None))));
            }
        }

        if self.diagnostic_store.is_none() {
            return;
        }
        if offline || in_background {
            if let Some(handle) = timers.diagnostics.take() {
                handle.abort();
            }
        } else {
            if !self.diagnostic_init_sent.load(Ordering::SeqCst) {
                self.post(Message::DiagnosticInit);
            }
            if timers.diagnostics.is_none() {
                timers.diagnostics = Some(self.spawn_ticker(
                    self.config.diagnostic_recording_interval,
                    || Message::DiagnosticStats,
                ));
            }
        }
    }

    fn stop_timers(&self) {
        self.timers.lock().abort_all();
    }

    fn handle_response(&self, result: &SendResult) {
        if let Some(time) = result.time_from_server {
            self.last_known_past_time
                .store(time.timestamp_millis(), Ordering::SeqCst);
        }
        if result.must_shut_down && !self.disabled.swap(true, Ordering::SeqCst) {
            tracing::warn!("Event delivery disabled for the rest of this processor's lifetime");
        }
    }

    /// Run a delivery unless close abandons it first. An abandoned delivery is dropped
    /// mid-flight, including any pending retry.
    async fn unless_abandoned(&self, delivery: impl std::future::Future<Output = SendResult>) {
        let mut abandoned = self.abandon_tx.subscribe();
        tokio::select! {
            result = delivery => self.handle_response(&result),
            _ = wait_abandoned(&mut abandoned) => {
                tracing::debug!("Discarding in-flight delivery after shutdown timeout");
            }
        }
    }

    fn abandon_deliveries(&self) {
        self.abandon_tx.send_replace(true);
        self.send_permits.close();
    }

    async fn deliver_analytics(&self, payload: Vec<u8>, event_count: usize) {
        if self.is_disabled() {
            return;
        }
        self.unless_abandoned(self.sender.send_analytics_events(
            payload,
            event_count,
            &self.config.events_uri,
        ))
        .await;
    }

    async fn deliver_diagnostic(&self, event: DiagnosticEvent) {
        if self.is_disabled() {
            return;
        }
        let payload = match event.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to serialize diagnostic event: {}", e);
                return;
            }
        };
        self.unless_abandoned(
            self.sender
                .send_diagnostic_event(payload, &self.config.events_uri),
        )
        .await;
    }

    /// Wait until no delivery holds a permit.
    async fn wait_until_idle(&self) {
        let permits = self.config.event_sending_pool_size as u32;
        let _ = self.send_permits.acquire_many(permits).await;
    }
}

async fn wait_abandoned(abandoned: &mut watch::Receiver<bool>) {
    let closed = abandoned.wait_for(|abandoned| *abandoned).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Events held for the next flush. Drops new events once full.
struct EventBuffer {
    capacity: usize,
    events: Vec<Event>,
    dropped: u64,
    exceeded: bool,
}

impl EventBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Vec::new(),
            dropped: 0,
            exceeded: false,
        }
    }

    fn add(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            if !self.exceeded {
                self.exceeded = true;
                tracing::warn!(
                    "Exceeded event queue capacity of {}; increase capacity to avoid dropping events",
                    self.capacity
                );
            }
            self.dropped += 1;
            return;
        }
        self.exceeded = false;
        self.events.push(event);
    }

    fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn restore(&mut self, events: Vec<Event>) {
        self.events = events;
    }

    fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Owned by the dispatcher task.
struct Dispatcher {
    shared: Arc<Shared>,
    events_rx: mpsc::Receiver<Event>,
    control_rx: mpsc::UnboundedReceiver<Message>,
    outbox: EventBuffer,
    summarizer: EventSummarizer,
    formatter: EventOutputFormatter,
    deduplicator: Option<Arc<dyn ContextDeduplicator>>,
    deduplicated_contexts: u64,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.process_event(event),
                Some(message) = self.control_rx.recv() => {
                    while let Ok(event) = self.events_rx.try_recv() {
                        self.process_event(event);
                    }
                    if self.handle_message(message).await {
                        break;
                    }
                }
                else => break,
            }
        }
        tracing::debug!("Event dispatcher stopped");
    }

    /// Returns true once the dispatcher should stop.
    async fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Flush(reply) => self.flush(reply),
            Message::FlushContexts => {
                if let Some(ref dedup) = self.deduplicator {
                    dedup.flush();
                }
            }
            Message::DiagnosticInit => {
                if let Some(ref store) = self.shared.diagnostic_store {
                    if !self.shared.diagnostics_paused()
                        && !self.shared.diagnostic_init_sent.swap(true, Ordering::SeqCst)
                    {
                        self.spawn_diagnostic(store.init_event());
                    }
                }
            }
            Message::DiagnosticStats => {
                if self.shared.diagnostics_paused() || self.shared.is_disabled() {
                    return false;
                }
                if let Some(ref store) = self.shared.diagnostic_store {
                    let dropped = self.outbox.take_dropped()
                        + self.shared.inbox_dropped.swap(0, Ordering::SeqCst);
                    let deduplicated = std::mem::take(&mut self.deduplicated_contexts);
                    self.spawn_diagnostic(store.create_event_and_reset(dropped, deduplicated));
                }
            }
            Message::Shutdown(reply) => {
                let (tx, rx) = oneshot::channel();
                self.flush(Some(tx));
                let _ = rx.await;
                self.shared.sender.close().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return true;
            }
        }
        false
    }

    fn process_event(&mut self, event: Event) {
        let now = now_millis();
        let mut add_full_event = true;
        let mut debug_event = None;

        if let Event::FeatureRequest(ref fe) = event {
            if !fe.exclude_from_summaries {
                self.summarizer.summarize_event(
                    fe.creation_date,
                    &fe.key,
                    fe.version,
                    fe.variation,
                    &fe.value,
                    &fe.default_value,
                    &fe.context,
                );
            }
            add_full_event = fe.track_events;
            if let Some(until) = fe.debug_events_until_date {
                let last_past = self.shared.last_known_past_time.load(Ordering::SeqCst);
                if until > last_past && until > now {
                    debug_event = Some(Event::FeatureRequest(fe.to_debug_event()));
                }
            }
        }

        let mut index_event = None;
        if let Some(ref dedup) = self.deduplicator {
            match event {
                Event::Identify(ref e) => {
                    dedup.process_context(&e.context);
                }
                Event::Index(_) => {}
                Event::Custom(_) | Event::FeatureRequest(_) => {
                    if dedup.process_context(event.context()) {
                        index_event = Some(Event::index(event.creation_date(), event.context().clone()));
                    } else {
                        self.deduplicated_contexts += 1;
                    }
                }
            }
        }

        if let Some(index) = index_event {
            self.outbox.add(index);
        }
        if add_full_event && should_sample(event.sampling_ratio()) {
            self.outbox.add(event);
        }
        if let Some(debug) = debug_event {
            if should_sample(debug.sampling_ratio()) {
                self.outbox.add(debug);
            }
        }
    }

    /// Answer a blocking flush once no delivery is in flight.
    fn reply_when_idle(&self, reply: Option<oneshot::Sender<()>>) {
        let Some(reply) = reply else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            shared.wait_until_idle().await;
            let _ = reply.send(());
        });
    }

    fn flush(&mut self, reply: Option<oneshot::Sender<()>>) {
        if self.shared.offline.load(Ordering::SeqCst)
            || (self.outbox.is_empty() && self.summarizer.is_empty())
        {
            self.reply_when_idle(reply);
            return;
        }

        if self.shared.is_disabled() {
            // Events are still accepted locally but never leave the process.
            self.outbox.take();
            self.summarizer.clear();
            self.reply_when_idle(reply);
            return;
        }

        let events = self.outbox.take();
        let summary = self.summarizer.take_summary();

        let permit: Option<OwnedSemaphorePermit> = if reply.is_none() {
            match Arc::clone(&self.shared.send_permits).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::debug!("All event delivery workers are busy, deferring flush");
                    self.outbox.restore(events);
                    self.summarizer.restore(summary);
                    return;
                }
            }
        } else {
            None
        };

        let (payload, count) = match self.formatter.write_output_events(&events, &summary) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!("Discarding event batch: {}", e);
                self.reply_when_idle(reply);
                return;
            }
        };
        if count == 0 {
            self.reply_when_idle(reply);
            return;
        }
        if let Some(ref store) = self.shared.diagnostic_store {
            store.record_events_in_batch(count as u64);
        }
        tracing::debug!("Flushing {} event(s)", count);

        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            let permit = match permit {
                Some(permit) => Some(permit),
                None => Arc::clone(&shared.send_permits).acquire_owned().await.ok(),
            };
            if permit.is_some() {
                shared.deliver_analytics(payload, count).await;
            }
            drop(permit);
            if let Some(reply) = reply {
                shared.wait_until_idle().await;
                let _ = reply.send(());
            }
        });
    }

    fn spawn_diagnostic(&self, event: DiagnosticEvent) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            let Ok(_permit) = Arc::clone(&shared.send_permits).acquire_owned().await else {
                return;
            };
            shared.deliver_diagnostic(event).await;
        });
    }
}

/// The default [`EventProcessor`].
///
/// Must be built inside a tokio runtime; the dispatcher, timers and deliveries all run
/// as tasks on that runtime.
///
/// # Example
///
/// ```rust,ignore
/// let config = EventsConfiguration::builder().capacity(500).build()?;
/// let processor = EventProcessorBuilder::new(config).build()?;
/// processor.send_event(Event::identify(Context::new("user-key")));
/// processor.close().await;
/// ```
pub struct DefaultEventProcessor {
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<Event>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl DefaultEventProcessor {
    pub fn builder(config: EventsConfiguration) -> EventProcessorBuilder {
        EventProcessorBuilder::new(config)
    }

    pub fn is_offline(&self) -> bool {
        self.shared.offline.load(Ordering::SeqCst)
    }

    pub fn is_in_background(&self) -> bool {
        self.shared.in_background.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Whether the endpoint told us to stop sending.
    pub fn is_disabled(&self) -> bool {
        self.shared.is_disabled()
    }

    pub fn config(&self) -> &EventsConfiguration {
        &self.shared.config
    }

    fn wait_reply(&self, rx: oneshot::Receiver<()>) -> impl std::future::Future<Output = bool> {
        let limit = self.shared.config.shutdown_timeout;
        async move { matches!(timeout(limit, rx).await, Ok(Ok(()))) }
    }
}

#[async_trait]
impl EventProcessor for DefaultEventProcessor {
    fn send_event(&self, event: Event) {
        if self.is_closed() {
            return;
        }
        match self.events_tx.try_send(event) {
            Ok(()) => {
                if self.shared.inbox_full_warned.load(Ordering::Relaxed) {
                    self.shared.inbox_full_warned.store(false, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Full(_)) => {
                self.shared.inbox_dropped.fetch_add(1, Ordering::SeqCst);
                if !self.shared.inbox_full_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Event queue is full ({} events); dropping events until it drains",
                        self.shared.config.capacity
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn flush_async(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.post(Message::Flush(None));
    }

    async fn flush_blocking(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        if !self.shared.post(Message::Flush(Some(tx))) {
            return false;
        }
        let completed = self.wait_reply(rx).await;
        if !completed {
            tracing::warn!("Timed out waiting for events to be flushed");
        }
        completed
    }

    fn set_offline(&self, offline: bool) {
        if self.shared.offline.swap(offline, Ordering::SeqCst) != offline {
            tracing::debug!("Event processor offline: {}", offline);
            self.shared.update_scheduled_tasks();
        }
    }

    fn set_in_background(&self, in_background: bool) {
        if self.shared.in_background.swap(in_background, Ordering::SeqCst) != in_background {
            tracing::debug!("Event processor in background: {}", in_background);
            self.shared.update_scheduled_tasks();
        }
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Closing event processor");
        self.shared.stop_timers();

        let (tx, rx) = oneshot::channel();
        if !self.shared.post(Message::Shutdown(Some(tx))) {
            return;
        }
        if !self.wait_reply(rx).await {
            tracing::warn!("Timed out waiting for event deliveries; discarding undelivered events");
            if let Some(handle) = self.dispatcher.lock().take() {
                handle.abort();
            }
            self.shared.abandon_deliveries();
            self.shared.sender.close().await;
        }
    }
}

impl Drop for DefaultEventProcessor {
    fn drop(&mut self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.stop_timers();
            self.shared.post(Message::Shutdown(None));
        }
    }
}

impl std::fmt::Debug for DefaultEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultEventProcessor")
            .field("offline", &self.is_offline())
            .field("in_background", &self.is_in_background())
            .field("closed", &self.is_closed())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

enum DeduplicatorChoice {
    Default,
    Custom(Arc<dyn ContextDeduplicator>),
    Disabled,
}

/// Builder for [`DefaultEventProcessor`].
pub struct EventProcessorBuilder {
    config: EventsConfiguration,
    sender: Option<Arc<dyn EventSender>>,
    http_properties: Option<HttpProperties>,
    deduplicator: DeduplicatorChoice,
    diagnostic_store: Option<Arc<DiagnosticStore>>,
}

impl EventProcessorBuilder {
    pub fn new(config: EventsConfiguration) -> Self {
        Self {
            config,
            sender: None,
            http_properties: None,
            deduplicator: DeduplicatorChoice::Default,
            diagnostic_store: None,
        }
    }

    /// Use a custom transport. Overrides [`http_properties`](Self::http_properties).
    pub fn sender(mut self, sender: Arc<dyn EventSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// HTTP settings for the default sender.
    pub fn http_properties(mut self, properties: HttpProperties) -> Self {
        self.http_properties = Some(properties);
        self
    }

    pub fn context_deduplicator(mut self, deduplicator: Arc<dyn ContextDeduplicator>) -> Self {
        self.deduplicator = DeduplicatorChoice::Custom(deduplicator);
        self
    }

    /// Never emit index events. Used by SDKs that send identify events themselves.
    pub fn without_context_deduplication(mut self) -> Self {
        self.deduplicator = DeduplicatorChoice::Disabled;
        self
    }

    /// Enables diagnostics unless the configuration opts out.
    pub fn diagnostic_store(mut self, store: Arc<DiagnosticStore>) -> Self {
        self.diagnostic_store = Some(store);
        self
    }

    /// Start the processor on the current tokio runtime.
    pub fn build(self) -> Result<DefaultEventProcessor> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            EventsError::with_source(
                ErrorCode::ProcessorNoRuntime,
                "Event processor must be created inside a tokio runtime",
                e,
            )
        })?;

        let sender: Arc<dyn EventSender> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(DefaultEventSender::new(
                self.http_properties.unwrap_or_default(),
            )?),
        };

        let deduplicator: Option<Arc<dyn ContextDeduplicator>> = match self.deduplicator {
            DeduplicatorChoice::Default => Some(Arc::new(DefaultContextDeduplicator::new(
                self.config.context_keys_capacity,
                self.config.context_keys_flush_interval,
            ))),
            DeduplicatorChoice::Custom(dedup) => Some(dedup),
            DeduplicatorChoice::Disabled => None,
        };

        let diagnostic_store = if self.config.diagnostic_opt_out {
            None
        } else {
            self.diagnostic_store
        };

        let config = self.config;
        let (events_tx, events_rx) = mpsc::channel(config.capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            send_permits: Arc::new(Semaphore::new(config.event_sending_pool_size)),
            abandon_tx: watch::channel(false).0,
            offline: AtomicBool::new(config.initially_offline),
            in_background: AtomicBool::new(config.initially_in_background),
            closed: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            diagnostic_init_sent: AtomicBool::new(false),
            inbox_dropped: AtomicU64::new(0),
            inbox_full_warned: AtomicBool::new(false),
            last_known_past_time: AtomicI64::new(0),
            timers: Mutex::new(Timers::default()),
            sender,
            diagnostic_store,
            runtime: runtime.clone(),
            control_tx,
            config,
        });

        let dispatcher = Dispatcher {
            outbox: EventBuffer::new(shared.config.capacity),
            summarizer: EventSummarizer::new(),
            formatter: EventOutputFormatter::new(&shared.config),
            shared: Arc::clone(&shared),
            events_rx,
            control_rx,
            deduplicator: deduplicator.clone(),
            deduplicated_contexts: 0,
        };
        let handle = runtime.spawn(dispatcher.run());

        if let Some(period) = deduplicator.as_ref().and_then(|d| d.flush_interval()) {
            shared.timers.lock().context_flush =
                Some(shared.spawn_ticker(period, || Message::FlushContexts));
        }
        shared.update_scheduled_tasks();

        Ok(DefaultEventProcessor {
            shared,
            events_tx,
            dispatcher: Mutex::new(Some(handle)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::diagnostics::SdkDiagnosticParams;
    use crate::types::Context;
    use reqwest::Url;
    use serde_json::Value;

    struct RecordingSender {
        analytics: Mutex<Vec<Vec<Value>>>,
        diagnostics: Mutex<Vec<Value>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                analytics: Mutex::new(Vec::new()),
                diagnostics: Mutex::new(Vec::new()),
            })
        }

        fn stats_events(&self) -> Vec<Value> {
            self.diagnostics
                .lock()
                .iter()
                .filter(|d| d["kind"] == "diagnostic")
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl EventSender for RecordingSender {
        async fn send_analytics_events(&self, data: Vec<u8>, _: usize, _: &Url) -> SendResult {
            self.analytics
                .lock()
                .push(serde_json::from_slice(&data).unwrap());
            SendResult::success(None)
        }

        async fn send_diagnostic_event(&self, data: Vec<u8>, _: &Url) -> SendResult {
            self.diagnostics
                .lock()
                .push(serde_json::from_slice(&data).unwrap());
            SendResult::success(None)
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn store() -> Arc<DiagnosticStore> {
        Arc::new(DiagnosticStore::new(SdkDiagnosticParams::new(
            "sdk-key-123456",
            "test-sdk",
            "1.0.0",
            "test",
        )))
    }

    #[tokio::test]
    async fn test_overflow_is_counted_in_diagnostics() {
        let sender = RecordingSender::new();
        let config = EventsConfiguration::builder().capacity(3).build().unwrap();
        let processor = EventProcessorBuilder::new(config)
            .sender(sender.clone())
            .diagnostic_store(store())
            .build()
            .unwrap();

        for i in 0..5 {
            processor.send_event(Event::identify(Context::new(format!("user-{}", i))));
        }
        assert!(processor.flush_blocking().await);

        let batches = sender.analytics.lock().clone();
        assert_eq!(batches.len(), 1);
        let keys: Vec<&str> = batches[0]
            .iter()
            .map(|e| e["context"]["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["user-0", "user-1", "user-2"]);

        processor.shared.post(Message::DiagnosticStats);
        wait_for(|| !sender.stats_events().is_empty()).await;
        let stats = sender.stats_events();
        assert_eq!(stats[0]["droppedEvents"], 2);
        assert_eq!(stats[0]["eventsInLastBatch"], 3);

        processor.shared.post(Message::DiagnosticStats);
        wait_for(|| sender.stats_events().len() == 2).await;
        assert_eq!(sender.stats_events()[1]["droppedEvents"], 0);

        processor.close().await;
    }

    #[tokio::test]
    async fn test_deduplicated_contexts_counted() {
        let sender = RecordingSender::new();
        let processor = EventProcessorBuilder::new(EventsConfiguration::default())
            .sender(sender.clone())
            .diagnostic_store(store())
            .build()
            .unwrap();

        let context = Context::new("user");
        for _ in 0..3 {
            processor.send_event(Event::custom(context.clone(), "clicked", None, None));
        }
        assert!(processor.flush_blocking().await);

        processor.shared.post(Message::DiagnosticStats);
        wait_for(|| !sender.stats_events().is_empty()).await;
        assert_eq!(sender.stats_events()[0]["deduplicatedUsers"], 2);

        processor.close().await;
    }

    #[tokio::test]
    async fn test_diagnostic_init_sent_once() {
        let sender = RecordingSender::new();
        let processor = EventProcessorBuilder::new(EventsConfiguration::default())
            .sender(sender.clone())
            .diagnostic_store(store())
            .build()
            .unwrap();

        processor.set_in_background(true);
        processor.set_in_background(false);
        assert!(processor.flush_blocking().await);
        wait_for(|| !sender.diagnostics.lock().is_empty()).await;

        let inits = sender
            .diagnostics
            .lock()
            .iter()
            .filter(|d| d["kind"] == "diagnostic-init")
            .count();
        assert_eq!(inits, 1);
        processor.close().await;
    }

    #[tokio::test]
    async fn test_diagnostics_held_while_offline() {
        let sender = RecordingSender::new();
        let config = EventsConfiguration::builder()
            .initially_offline(true)
            .build()
            .unwrap();
        let processor = EventProcessorBuilder::new(config)
            .sender(sender.clone())
            .diagnostic_store(store())
            .build()
            .unwrap();

        processor.shared.post(Message::DiagnosticInit);
        processor.shared.post(Message::DiagnosticStats);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sender.diagnostics.lock().is_empty());
        assert!(!processor.shared.diagnostic_init_sent.load(Ordering::SeqCst));

        processor.set_offline(false);
        wait_for(|| !sender.diagnostics.lock().is_empty()).await;
        assert_eq!(sender.diagnostics.lock()[0]["kind"], "diagnostic-init");
        assert!(sender.stats_events().is_empty());

        processor.set_in_background(true);
        processor.shared.post(Message::DiagnosticStats);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sender.stats_events().is_empty());
        processor.close().await;
    }

    #[tokio::test]
    async fn test_diagnostics_opt_out() {
        let sender = RecordingSender::new();
        let config = EventsConfiguration::builder()
            .diagnostic_opt_out(true)
            .build()
            .unwrap();
        let processor = EventProcessorBuilder::new(config)
            .sender(sender.clone())
            .diagnostic_store(store())
            .build()
            .unwrap();

        processor.shared.post(Message::DiagnosticStats);
        assert!(processor.flush_blocking().await);
        processor.close().await;
        assert!(sender.diagnostics.lock().is_empty());
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = EventProcessorBuilder::new(EventsConfiguration::default())
            .sender(RecordingSender::new())
            .build()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProcessorNoRuntime);
    }

    #[test]
    fn test_event_buffer_drops_newest() {
        let mut buffer = EventBuffer::new(2);
        for i in 0..4 {
            buffer.add(Event::identify(Context::new(format!("u{}", i))));
        }
        assert_eq!(buffer.take_dropped(), 2);
        assert_eq!(buffer.take_dropped(), 0);
        let keys: Vec<String> = buffer
            .take()
            .iter()
            .map(|e| e.context().fully_qualified_key())
            .collect();
        assert_eq!(keys, vec!["u0", "u1"]);
    }
}
