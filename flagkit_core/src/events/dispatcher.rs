use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;

use crate::config::EventsConfig;

use super::buffer::{EventBuffer, FlushPayload};
use super::diagnostics::DiagnosticsAccumulator;
use super::event::{now_millis, Event, InboxMessage, IndexEvent};
use super::formatter::EventFormatter;
use super::lru::UserKeyLru;
use super::pool::WorkerPool;
use super::sender::{EventSender, SenderResult};

/// Number of threads performing event payload deliveries. Diagnostics use their own
/// single-worker pool so they cannot steal delivery capacity.
const MAX_FLUSH_WORKERS: usize = 5;

/// A unit of work for a delivery worker.
pub(crate) enum FlushJob {
    Events(FlushPayload),
    Diagnostic(serde_json::Value),
    /// Barrier: acknowledge once accepted. Accepting implies the previous job finished.
    Sync(std::sync::mpsc::SyncSender<()>),
}

/// State shared between the dispatcher and its delivery workers.
struct DeliveryContext {
    formatter: EventFormatter,
    sender: Arc<dyn EventSender>,
    disabled: Arc<AtomicBool>,
    last_known_past_time: Arc<AtomicU64>,
}

impl DeliveryContext {
    fn deliver(&self, job: FlushJob) {
        match job {
            FlushJob::Sync(reply) => {
                let _ = reply.send(());
            }
            FlushJob::Events(payload) => {
                let output = self
                    .formatter
                    .output_events(&payload.events, payload.summary);
                if output.is_empty() {
                    return;
                }
                let body = match serde_json::to_string(&output) {
                    Ok(body) => body,
                    Err(err) => {
                        log::error!(target: "flagkit", "failed to serialize event payload: {err}");
                        return;
                    }
                };
                let description = format!("{} events", output.len());
                let result = self.sender.send_event_data(body, &description, false);
                self.apply(result);
            }
            FlushJob::Diagnostic(event) => {
                let body = match serde_json::to_string(&event) {
                    Ok(body) => body,
                    Err(err) => {
                        log::error!(target: "flagkit", "failed to serialize diagnostic event: {err}");
                        return;
                    }
                };
                let result = self.sender.send_event_data(body, "diagnostic event", true);
                self.apply(result);
            }
        }
    }

    fn apply(&self, result: SenderResult) {
        if result.must_shutdown {
            self.disabled.store(true, Ordering::SeqCst);
        }
        if let Some(server_time) = result.time_from_server {
            // Monotonic: concurrent flushes must not move the clock backwards.
            self.last_known_past_time
                .fetch_max(server_time, Ordering::SeqCst);
        }
    }
}

/// The single consumer of the inbox. Owns all mutable pipeline state, so no locking is needed
/// for the buffer, summarizer, or user-key cache.
pub(crate) struct EventDispatcher {
    inbox: Receiver<InboxMessage>,
    buffer: EventBuffer,
    user_keys: UserKeyLru,
    deduplicated_users: u64,
    events_in_last_batch: u64,
    inline_users_in_events: bool,
    disabled: Arc<AtomicBool>,
    last_known_past_time: Arc<AtomicU64>,
    flush_pool: WorkerPool<FlushJob>,
    diagnostic_pool: Option<WorkerPool<FlushJob>>,
    diagnostics: Option<DiagnosticsAccumulator>,
    sender: Arc<dyn EventSender>,
}

impl EventDispatcher {
    pub fn new(
        config: &EventsConfig,
        inbox: Receiver<InboxMessage>,
        sender: Arc<dyn EventSender>,
        disabled: Arc<AtomicBool>,
        last_known_past_time: Arc<AtomicU64>,
        diagnostics: Option<DiagnosticsAccumulator>,
    ) -> std::io::Result<EventDispatcher> {
        let context = Arc::new(DeliveryContext {
            formatter: EventFormatter::new(config),
            sender: Arc::clone(&sender),
            disabled: Arc::clone(&disabled),
            last_known_past_time: Arc::clone(&last_known_past_time),
        });

        let flush_pool = {
            let context = Arc::clone(&context);
            WorkerPool::new("flagkit-flush", MAX_FLUSH_WORKERS, move |job| {
                context.deliver(job)
            })?
        };
        let diagnostic_pool = if diagnostics.is_some() {
            let context = Arc::clone(&context);
            Some(WorkerPool::new("flagkit-diagnostic", 1, move |job| {
                context.deliver(job)
            })?)
        } else {
            None
        };

        Ok(EventDispatcher {
            inbox,
            buffer: EventBuffer::new(config.effective_capacity()),
            user_keys: UserKeyLru::new(config.user_keys_capacity),
            deduplicated_users: 0,
            events_in_last_batch: 0,
            inline_users_in_events: config.inline_users_in_events,
            disabled,
            last_known_past_time,
            flush_pool,
            diagnostic_pool,
            diagnostics,
            sender,
        })
    }

    pub fn run(mut self) {
        // Warm the pools up so the first flush cannot race worker startup, and emit the init
        // diagnostic.
        self.synchronize_workers();
        self.send_init_diagnostic();

        loop {
            let Ok(message) = self.inbox.recv() else {
                // Every producer handle is gone; nothing more can arrive.
                break;
            };

            match message {
                InboxMessage::Stop(reply) => {
                    self.shutdown();
                    let _ = reply.send(());
                    break;
                }
                message => {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        self.handle_message(message)
                    }));
                    if outcome.is_err() {
                        log::error!(
                            target: "flagkit",
                            "unexpected panic while processing an event pipeline message"
                        );
                    }
                }
            }
        }
    }

    fn handle_message(&mut self, message: InboxMessage) {
        match message {
            InboxMessage::Event(event) => self.dispatch_event(*event),
            InboxMessage::Flush => self.trigger_flush(),
            InboxMessage::FlushUsers => self.user_keys.clear(),
            InboxMessage::Diagnostic => self.send_periodic_diagnostic(),
            InboxMessage::TestSync(reply) => {
                self.synchronize_workers();
                let _ = reply.send(());
            }
            // Handled in `run` so the loop can exit.
            InboxMessage::Stop(_) => {}
        }
    }

    fn dispatch_event(&mut self, event: Event) {
        if self.disabled.load(Ordering::SeqCst) {
            return;
        }

        self.buffer.add_to_summary(&event);

        let full = match &event {
            Event::Eval(eval) => eval.track_events,
            _ => true,
        };

        let debug = match &event {
            Event::Eval(eval) => eval.debug_until.is_some_and(|until| {
                until > self.last_known_past_time.load(Ordering::SeqCst) && until > now_millis()
            }),
            _ => false,
        };

        let index_event = match event.user() {
            Some(user) => {
                let already_seen = self.notice_user(user.key());
                let suppress = matches!(event, Event::Identify(_))
                    || (full && self.inline_users_in_events);
                (!already_seen && !suppress).then(|| {
                    Event::Index(IndexEvent {
                        creation_date: event.creation_date(),
                        user: user.clone(),
                    })
                })
            }
            None => None,
        };

        let debug_event = match (&event, debug) {
            (Event::Eval(eval), true) => Some(Event::Debug(eval.clone())),
            _ => None,
        };

        if let Some(index_event) = index_event {
            self.buffer.add_event(index_event);
        }
        if full {
            self.buffer.add_event(event);
        }
        if let Some(debug_event) = debug_event {
            self.buffer.add_event(debug_event);
        }
    }

    /// Record the user key as seen. A previously seen key counts as a de-duplicated user.
    fn notice_user(&mut self, key: &str) -> bool {
        let already_seen = self.user_keys.notice(key);
        if already_seen {
            self.deduplicated_users += 1;
        }
        already_seen
    }

    fn trigger_flush(&mut self) {
        if self.disabled.load(Ordering::SeqCst) {
            return;
        }
        if self.buffer.is_empty() {
            self.events_in_last_batch = 0;
            return;
        }

        let payload = self.buffer.take_payload();
        self.events_in_last_batch =
            payload.events.len() as u64 + if payload.summary.is_empty() { 0 } else { 1 };

        if let Err(FlushJob::Events(payload)) = self.flush_pool.post(FlushJob::Events(payload)) {
            // Every worker is busy. Keep the payload buffered; the next flush retries it.
            log::debug!(target: "flagkit", "all flush workers are busy; deferring flush");
            self.buffer.restore(payload);
        }
    }

    fn send_init_diagnostic(&mut self) {
        let Some(diagnostics) = &self.diagnostics else {
            return;
        };
        let Some(pool) = &self.diagnostic_pool else {
            return;
        };
        // The loop has not started yet, so a blocking hand-off is fine and guarantees the init
        // event is not lost to a startup race.
        match serde_json::to_value(diagnostics.create_init_event()) {
            Ok(event) => {
                pool.broadcast(|| FlushJob::Diagnostic(event.clone()));
            }
            Err(err) => {
                log::error!(target: "flagkit", "failed to serialize diagnostic event: {err}");
            }
        }
    }

    fn send_periodic_diagnostic(&mut self) {
        if self.diagnostics.is_none() {
            return;
        }
        let dropped_events = self.buffer.take_dropped_count();
        let deduplicated_users = std::mem::take(&mut self.deduplicated_users);
        let events_in_last_batch = self.events_in_last_batch;
        let diagnostics = self.diagnostics.as_mut().unwrap();
        let event = diagnostics.create_periodic_event_and_reset(
            dropped_events,
            deduplicated_users,
            events_in_last_batch,
        );
        self.post_diagnostic(serde_json::to_value(event));
    }

    fn post_diagnostic(&self, event: Result<serde_json::Value, serde_json::Error>) {
        let Some(pool) = &self.diagnostic_pool else {
            return;
        };
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                log::error!(target: "flagkit", "failed to serialize diagnostic event: {err}");
                return;
            }
        };
        if pool.post(FlushJob::Diagnostic(event)).is_err() {
            log::debug!(target: "flagkit", "diagnostic worker is busy; dropping diagnostic event");
        }
    }

    /// Block until every delivery worker has finished its outstanding job.
    fn synchronize_workers(&self) {
        for pool in std::iter::once(&self.flush_pool).chain(self.diagnostic_pool.as_ref()) {
            let (reply, done) = sync_channel(MAX_FLUSH_WORKERS);
            let delivered = pool.broadcast(|| FlushJob::Sync(reply.clone()));
            for _ in 0..delivered {
                let _ = done.recv();
            }
        }
    }

    fn shutdown(&mut self) {
        self.flush_pool.shutdown();
        if let Some(pool) = &mut self.diagnostic_pool {
            pool.shutdown();
        }
        self.sender.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::mpsc::sync_channel;
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use crate::config::EventsConfig;
    use crate::events::event::{now_millis, EvalEvent, Event, IdentifyEvent, InboxMessage};
    use crate::events::sender::{EventSender, SenderResult};
    use crate::user::User;

    use super::EventDispatcher;

    #[derive(Default)]
    struct CapturingSender {
        bodies: Mutex<Vec<(String, bool)>>,
        result: Mutex<SenderResult>,
    }

    impl CapturingSender {
        fn payloads(&self) -> Vec<Value> {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, is_diagnostic)| !is_diagnostic)
                .map(|(body, _)| serde_json::from_str(body).unwrap())
                .collect()
        }

        fn set_result(&self, result: SenderResult) {
            *self.result.lock().unwrap() = result;
        }
    }

    impl EventSender for CapturingSender {
        fn send_event_data(&self, body: String, _description: &str, is_diagnostic: bool) -> SenderResult {
            self.bodies.lock().unwrap().push((body, is_diagnostic));
            self.result.lock().unwrap().clone()
        }
    }

    struct Harness {
        dispatcher: EventDispatcher,
        sender: Arc<CapturingSender>,
        disabled: Arc<AtomicBool>,
        last_known_past_time: Arc<AtomicU64>,
    }

    fn harness(config: EventsConfig) -> Harness {
        let sender = Arc::new(CapturingSender::default());
        let disabled = Arc::new(AtomicBool::new(false));
        let last_known_past_time = Arc::new(AtomicU64::new(0));
        // The receiver half is unused: tests drive handle_message directly.
        let (_inbox_tx, inbox_rx) = sync_channel(16);
        let dispatcher = EventDispatcher::new(
            &config,
            inbox_rx,
            sender.clone(),
            disabled.clone(),
            last_known_past_time.clone(),
            None,
        )
        .unwrap();
        Harness { dispatcher, sender, disabled, last_known_past_time }
    }

    impl Harness {
        fn dispatch(&mut self, event: Event) {
            self.dispatcher.handle_message(InboxMessage::Event(Box::new(event)));
        }

        /// Flush and wait for delivery. A flush submission can be rejected while a worker is
        /// still between jobs, in which case the payload stays buffered; retry until it drains.
        fn flush_and_wait(&mut self) {
            for _ in 0..1000 {
                self.dispatcher.handle_message(InboxMessage::Flush);
                if self.dispatcher.buffer.is_empty() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            self.dispatcher.synchronize_workers();
        }
    }

    fn eval_event(user: &str, track: bool) -> Event {
        let mut event = EvalEvent::new(User::new(user), "F", json!(true));
        event.creation_date = now_millis();
        event.version = Some(9);
        event.variation = Some(0);
        event.default_value = Some(json!(false));
        event.track_events = track;
        Event::Eval(event)
    }

    fn kinds(payload: &Value) -> Vec<String> {
        payload
            .as_array()
            .unwrap()
            .iter()
            .map(|event| event["kind"].as_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn untracked_evals_appear_only_in_summary() {
        let mut h = harness(EventsConfig::new());
        for _ in 0..3 {
            h.dispatch(eval_event("u1", false));
        }
        h.flush_and_wait();

        let payloads = h.sender.payloads();
        assert_eq!(payloads.len(), 1);
        // The user still produces one index event; the evals themselves are summarized.
        assert_eq!(kinds(&payloads[0]), ["index", "summary"]);
        assert_eq!(
            payloads[0][1]["features"]["F"]["counters"][0]["count"],
            json!(3)
        );
    }

    #[test]
    fn tracked_eval_emits_index_then_feature() {
        let mut h = harness(EventsConfig::new());
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();

        let payloads = h.sender.payloads();
        assert_eq!(kinds(&payloads[0]), ["index", "feature", "summary"]);
        assert_eq!(payloads[0][0]["user"]["key"], json!("u1"));
        assert_eq!(payloads[0][1]["userKey"], json!("u1"));
    }

    #[test]
    fn index_emitted_once_per_user_until_keys_flushed() {
        let mut h = harness(EventsConfig::new());
        h.dispatch(eval_event("u1", true));
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();
        assert_eq!(
            kinds(&h.sender.payloads()[0]),
            ["index", "feature", "feature", "summary"]
        );

        h.dispatcher.handle_message(InboxMessage::FlushUsers);
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();
        assert_eq!(kinds(&h.sender.payloads()[1]), ["index", "feature", "summary"]);
    }

    #[test]
    fn deduplicated_users_are_counted() {
        let mut h = harness(EventsConfig::new());
        h.dispatch(eval_event("u1", true));
        h.dispatch(eval_event("u1", true));
        h.dispatch(eval_event("u2", true));

        assert_eq!(h.dispatcher.deduplicated_users, 1);
    }

    #[test]
    fn inline_users_suppress_index_for_full_events() {
        let mut h = harness(EventsConfig::new().with_inline_users_in_events(true));
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();

        assert_eq!(kinds(&h.sender.payloads()[0]), ["feature", "summary"]);
    }

    #[test]
    fn inline_users_still_index_summarized_events() {
        let mut h = harness(EventsConfig::new().with_inline_users_in_events(true));
        h.dispatch(eval_event("u1", false));
        h.flush_and_wait();

        assert_eq!(kinds(&h.sender.payloads()[0]), ["index", "summary"]);
    }

    #[test]
    fn identify_suppresses_index_but_registers_user() {
        let mut h = harness(EventsConfig::new());
        h.dispatch(Event::Identify(IdentifyEvent {
            creation_date: now_millis(),
            user: User::new("u1"),
        }));
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();

        assert_eq!(kinds(&h.sender.payloads()[0]), ["identify", "feature", "summary"]);
    }

    #[test]
    fn debug_event_emitted_while_window_open() {
        let mut h = harness(EventsConfig::new());
        let mut event = EvalEvent::new(User::new("u1"), "F", json!(true));
        event.creation_date = now_millis();
        event.debug_until = Some(now_millis() + 60_000);
        h.dispatch(Event::Eval(event));
        h.flush_and_wait();

        assert_eq!(kinds(&h.sender.payloads()[0]), ["index", "debug", "summary"]);
    }

    #[test]
    fn debug_event_suppressed_when_window_passed_locally() {
        let mut h = harness(EventsConfig::new());
        let mut event = EvalEvent::new(User::new("u1"), "F", json!(true));
        event.creation_date = now_millis();
        event.debug_until = Some(now_millis().saturating_sub(60_000));
        h.dispatch(Event::Eval(event));
        h.flush_and_wait();

        assert_eq!(kinds(&h.sender.payloads()[0]), ["index", "summary"]);
    }

    #[test]
    fn debug_event_suppressed_when_server_clock_passed_window() {
        let mut h = harness(EventsConfig::new());
        let until = now_millis() + 60_000;
        h.last_known_past_time.store(until + 1, Ordering::SeqCst);

        let mut event = EvalEvent::new(User::new("u1"), "F", json!(true));
        event.creation_date = now_millis();
        event.debug_until = Some(until);
        h.dispatch(Event::Eval(event));
        h.flush_and_wait();

        assert_eq!(kinds(&h.sender.payloads()[0]), ["index", "summary"]);
    }

    #[test]
    fn server_time_advances_monotonically() {
        let mut h = harness(EventsConfig::new());
        h.sender.set_result(SenderResult {
            must_shutdown: false,
            time_from_server: Some(5000),
        });
        h.dispatch(eval_event("u1", false));
        h.flush_and_wait();
        assert_eq!(h.last_known_past_time.load(Ordering::SeqCst), 5000);

        // An older server timestamp must not move the clock backwards.
        h.sender.set_result(SenderResult {
            must_shutdown: false,
            time_from_server: Some(4000),
        });
        h.dispatch(eval_event("u2", false));
        h.flush_and_wait();
        assert_eq!(h.last_known_past_time.load(Ordering::SeqCst), 5000);
    }

    #[test]
    fn must_shutdown_disables_the_pipeline() {
        let mut h = harness(EventsConfig::new());
        h.sender.set_result(SenderResult { must_shutdown: true, time_from_server: None });
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();
        assert!(h.disabled.load(Ordering::SeqCst));

        // Subsequent events and flushes are no-ops.
        h.dispatch(eval_event("u2", true));
        h.flush_and_wait();
        assert_eq!(h.sender.payloads().len(), 1);
    }

    #[test]
    fn flush_of_empty_buffer_sends_nothing() {
        let mut h = harness(EventsConfig::new());
        h.flush_and_wait();
        assert!(h.sender.payloads().is_empty());
        assert_eq!(h.dispatcher.events_in_last_batch, 0);
    }

    #[test]
    fn events_in_last_batch_counts_summary_as_one() {
        let mut h = harness(EventsConfig::new());
        h.dispatch(eval_event("u1", true));
        h.flush_and_wait();

        // index + feature + summary
        assert_eq!(h.dispatcher.events_in_last_batch, 3);
    }

    #[test]
    fn summary_counts_match_recorded_evals() {
        let mut h = harness(EventsConfig::new());
        let total = 20;
        let tracked = 7;
        for i in 0..total {
            h.dispatch(eval_event("u1", i < tracked));
        }
        h.flush_and_wait();

        let payload = &h.sender.payloads()[0];
        let events = payload.as_array().unwrap();
        let features = events.iter().filter(|e| e["kind"] == "feature").count();
        let summary_count = events.last().unwrap()["features"]["F"]["counters"][0]["count"]
            .as_u64()
            .unwrap();

        assert_eq!(features, tracked);
        assert_eq!(summary_count, total as u64);
    }
}
