use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;

use crate::config::EventsConfig;
use crate::user::User;

use super::diagnostics::DiagnosticsAccumulator;
use super::dispatcher::EventDispatcher;
use super::event::{
    now_millis, AliasEvent, CustomEvent, EvalEvent, Event, IdentifyEvent, InboxMessage,
};
use super::sender::EventSender;

/// The producer-facing front end of the analytics event pipeline.
///
/// A processor owns the bounded inbox, the periodic timers, and the dispatcher thread that
/// consumes the inbox. All `record_*` operations and [`EventProcessor::flush`] are non-blocking:
/// when the inbox is saturated the event is dropped and a warning is logged once per saturation
/// episode. Only [`EventProcessor::stop`] blocks.
///
/// One processor exists per SDK client and is stopped exactly once; see
/// [`EventProcessor::stop`].
pub struct EventProcessor {
    inbox: SyncSender<InboxMessage>,
    /// Latched while the inbox is saturated so the drop warning is logged once per episode.
    inbox_full: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    tickers: Mutex<Vec<Ticker>>,
}

impl EventProcessor {
    /// Start the pipeline: the dispatcher thread, the delivery worker pools, and the periodic
    /// flush / user-key / diagnostic timers.
    ///
    /// `sdk_key` only identifies this SDK instance in diagnostic events; authentication is the
    /// sender's concern.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a background thread could not be spawned.
    pub fn new(
        config: EventsConfig,
        sdk_key: &str,
        sender: Arc<dyn EventSender>,
    ) -> std::io::Result<EventProcessor> {
        let (inbox_tx, inbox_rx) = sync_channel(config.effective_capacity());
        let disabled = Arc::new(AtomicBool::new(false));
        let last_known_past_time = Arc::new(AtomicU64::new(0));

        let diagnostics = if config.diagnostic_opt_out {
            None
        } else {
            Some(DiagnosticsAccumulator::new(&config, sdk_key))
        };

        let dispatcher = EventDispatcher::new(
            &config,
            inbox_rx,
            sender,
            disabled,
            last_known_past_time,
            diagnostics,
        )?;
        let dispatcher_handle = std::thread::Builder::new()
            .name("flagkit-events".to_owned())
            .spawn(move || dispatcher.run())?;

        let mut tickers = vec![
            Ticker::spawn(
                "flagkit-flush-timer",
                config.flush_interval,
                inbox_tx.clone(),
                || InboxMessage::Flush,
            )?,
            Ticker::spawn(
                "flagkit-user-keys-timer",
                config.user_keys_flush_interval,
                inbox_tx.clone(),
                || InboxMessage::FlushUsers,
            )?,
        ];
        if !config.diagnostic_opt_out {
            tickers.push(Ticker::spawn(
                "flagkit-diagnostic-timer",
                config.diagnostic_recording_interval,
                inbox_tx.clone(),
                || InboxMessage::Diagnostic,
            )?);
        }

        Ok(EventProcessor {
            inbox: inbox_tx,
            inbox_full: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            dispatcher: Mutex::new(Some(dispatcher_handle)),
            tickers: Mutex::new(tickers),
        })
    }

    /// Record a flag evaluation. `event.creation_date` is stamped here.
    pub fn record_eval(&self, mut event: EvalEvent) {
        event.creation_date = now_millis();
        self.enqueue_event(Event::Eval(event));
    }

    /// Record that the application identified a user.
    pub fn record_identify(&self, user: User) {
        self.enqueue_event(Event::Identify(IdentifyEvent { creation_date: now_millis(), user }));
    }

    /// Record an application-defined event, optionally with a payload and a metric value.
    pub fn record_custom(
        &self,
        user: User,
        key: impl Into<String>,
        data: Option<Value>,
        metric_value: Option<f64>,
    ) {
        self.enqueue_event(Event::Custom(CustomEvent {
            creation_date: now_millis(),
            user,
            key: key.into(),
            data,
            metric_value,
        }));
    }

    /// Record that `user` is the same person as `previous_user`.
    pub fn record_alias(&self, user: &User, previous_user: &User) {
        self.enqueue_event(Event::Alias(AliasEvent {
            creation_date: now_millis(),
            key: user.key().to_owned(),
            context_kind: user.context_kind().to_owned(),
            previous_key: previous_user.key().to_owned(),
            previous_context_kind: previous_user.context_kind().to_owned(),
        }));
    }

    /// Ask the dispatcher to deliver everything buffered so far. Returns immediately.
    pub fn flush(&self) {
        self.enqueue(InboxMessage::Flush);
    }

    /// Shut the pipeline down: stop the timers, deliver in-flight data with a final flush, and
    /// wait for the dispatcher to acknowledge. Idempotent; the second and later calls return
    /// immediately.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        for ticker in self.tickers.lock().unwrap().drain(..) {
            ticker.stop();
        }

        // Blocking sends: the final flush and the stop sentinel must not be dropped, whatever
        // the inbox backlog looks like.
        let _ = self.inbox.send(InboxMessage::Flush);
        let (reply, acknowledged) = sync_channel(1);
        if self.inbox.send(InboxMessage::Stop(reply)).is_ok() {
            let _ = acknowledged.recv();
        }

        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Block until the dispatcher has processed everything enqueued so far and all delivery
    /// workers are idle.
    #[cfg(test)]
    pub(crate) fn wait_until_idle(&self) {
        let (reply, done) = sync_channel(1);
        if self.inbox.send(InboxMessage::TestSync(reply)).is_ok() {
            let _ = done.recv();
        }
    }

    fn enqueue_event(&self, event: Event) {
        self.enqueue(InboxMessage::Event(Box::new(event)));
    }

    fn enqueue(&self, message: InboxMessage) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        match self.inbox.try_send(message) {
            Ok(()) => {
                self.inbox_full.store(false, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                if !self.inbox_full.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        target: "flagkit",
                        "events are being produced faster than they can be processed; some events will be dropped"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// A processor with no dispatcher or timers behind it, so tests can observe the raw inbox.
    #[cfg(test)]
    fn detached(config: EventsConfig) -> (EventProcessor, std::sync::mpsc::Receiver<InboxMessage>) {
        let (inbox_tx, inbox_rx) = sync_channel(config.effective_capacity());
        let processor = EventProcessor {
            inbox: inbox_tx,
            inbox_full: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            dispatcher: Mutex::new(None),
            tickers: Mutex::new(Vec::new()),
        };
        (processor, inbox_rx)
    }
}

/// A recurring timer thread posting one sentinel per tick. Ticks are posted non-blocking: if
/// the inbox is full the tick is dropped and the next one retries.
struct Ticker {
    stop_sender: SyncSender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(
        name: &str,
        interval: Duration,
        inbox: SyncSender<InboxMessage>,
        make_message: impl Fn() -> InboxMessage + Send + 'static,
    ) -> std::io::Result<Ticker> {
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);
        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || loop {
                match stop_receiver.recv_timeout(interval) {
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                        let _ = inbox.try_send(make_message());
                    }
                    Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
                }
            })?;
        Ok(Ticker { stop_sender, handle })
    }

    fn stop(self) {
        let _ = self.stop_sender.try_send(());
        let _ = self.handle.join();
    }
}
