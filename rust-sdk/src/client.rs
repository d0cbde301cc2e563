use std::sync::Arc;

use serde_json::Value;

use flagkit_core::eval::{Detail, ErrorKind, Evaluator, ReasonKind};
use flagkit_core::events::{EvalEvent, EventProcessor, EventSender, HttpEventSender};
use flagkit_core::store::{DataStore, InMemoryFeatureStore};
use flagkit_core::{Result, User};

use crate::ClientConfig;

/// A client for the Flagkit service.
///
/// The client owns the feature store and the analytics event pipeline. Flag evaluation is
/// local: [`Client::variation`] reads the store and never performs I/O of its own, while the
/// evaluation events it produces are delivered in the background.
///
/// The store starts empty; a configuration updater (streaming or polling) is expected to feed
/// it through [`Client::store`]. Evaluating against an empty store serves default values.
///
/// Call [`Client::close`] when done so that buffered analytics events are delivered.
pub struct Client {
    store: Arc<InMemoryFeatureStore>,
    events: EventProcessor,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Result<Client> {
        let sender: Arc<dyn EventSender> = match config.event_sender {
            Some(sender) => sender,
            None => Arc::new(HttpEventSender::new(
                &config.events.events_uri,
                config.sdk_key.as_str(),
            )?),
        };
        let events = EventProcessor::new(config.events, &config.sdk_key, sender)?;

        Ok(Client {
            store: Arc::new(InMemoryFeatureStore::new()),
            events,
        })
    }

    /// The feature store backing this client, for configuration updaters to write into.
    pub fn store(&self) -> &Arc<InMemoryFeatureStore> {
        &self.store
    }

    /// Evaluate a flag for a user, returning `default` when the flag is missing, off without an
    /// off variation, or malformed.
    pub fn variation(&self, user: &User, flag_key: &str, default: Value) -> Value {
        self.variation_detail(user, flag_key, default).value
    }

    /// Like [`Client::variation`], but returns the full evaluation detail including the reason.
    pub fn variation_detail(&self, user: &User, flag_key: &str, default: Value) -> Detail {
        let Some(flag) = self.store.flag(flag_key) else {
            log::warn!(
                target: "flagkit",
                "unknown feature flag {flag_key:?}; returning default value"
            );
            let detail = Detail {
                value: default.clone(),
                variation_index: None,
                reason: ReasonKind::Error { error_kind: ErrorKind::FlagNotFound }.into(),
            };
            let mut event = EvalEvent::new(user.clone(), flag_key, default.clone());
            event.default_value = Some(default);
            event.reason = Some(detail.reason.clone());
            self.events.record_eval(event);
            return detail;
        };

        let result = Evaluator::new(self.store.as_ref()).evaluate(&flag, user);

        for record in result.prereq_evals {
            let mut event =
                EvalEvent::new(user.clone(), record.flag.key.clone(), record.detail.value);
            event.version = Some(record.flag.version);
            event.variation = record.detail.variation_index;
            event.reason = Some(record.detail.reason);
            event.track_events = record.flag.track_events;
            event.debug_until = record.flag.debug_events_until_date;
            event.prereq_of = Some(record.prereq_of);
            self.events.record_eval(event);
        }

        let mut detail = result.detail;
        if detail.variation_index.is_none() {
            detail.value = default.clone();
        }

        let mut event = EvalEvent::new(user.clone(), flag_key, detail.value.clone());
        event.version = Some(flag.version);
        event.variation = detail.variation_index;
        event.default_value = Some(default);
        event.reason = Some(detail.reason.clone());
        event.track_events = flag.track_events;
        event.debug_until = flag.debug_events_until_date;
        self.events.record_eval(event);

        detail
    }

    /// Evaluate a boolean flag.
    pub fn bool_variation(&self, user: &User, flag_key: &str, default: bool) -> bool {
        self.variation(user, flag_key, Value::Bool(default))
            .as_bool()
            .unwrap_or(default)
    }

    /// Evaluate a string flag.
    pub fn string_variation(&self, user: &User, flag_key: &str, default: &str) -> String {
        match self.variation(user, flag_key, Value::String(default.to_owned())) {
            Value::String(s) => s,
            _ => default.to_owned(),
        }
    }

    /// Evaluate a numeric flag.
    pub fn float_variation(&self, user: &User, flag_key: &str, default: f64) -> f64 {
        self.variation(user, flag_key, default.into())
            .as_f64()
            .unwrap_or(default)
    }

    /// Report the user's full attribute set to the analytics pipeline.
    pub fn identify(&self, user: User) {
        self.events.record_identify(user);
    }

    /// Record an application-defined event, optionally with a payload and a metric value.
    pub fn track(
        &self,
        user: User,
        key: impl Into<String>,
        data: Option<Value>,
        metric_value: Option<f64>,
    ) {
        self.events.record_custom(user, key, data, metric_value);
    }

    /// Associate two users, e.g. an anonymous visitor with the account they logged into.
    pub fn alias(&self, user: &User, previous_user: &User) {
        self.events.record_alias(user, previous_user);
    }

    /// Ask the event pipeline to deliver everything buffered so far. Returns immediately.
    pub fn flush(&self) {
        self.events.flush();
    }

    /// Deliver in-flight analytics events and shut the pipeline down. Idempotent; only the
    /// first call blocks.
    pub fn close(&self) {
        self.events.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::{json, Value};

    use flagkit_core::events::{EventSender, SenderResult};
    use flagkit_core::flag::FeatureFlag;
    use flagkit_core::{EventsConfig, User};

    use crate::ClientConfig;

    use super::Client;

    #[derive(Default)]
    struct CapturingSender {
        bodies: Mutex<Vec<String>>,
    }

    impl CapturingSender {
        fn events(&self) -> Vec<Value> {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .flat_map(|body| serde_json::from_str::<Vec<Value>>(body).unwrap())
                .collect()
        }
    }

    impl EventSender for CapturingSender {
        fn send_event_data(&self, body: String, _description: &str, _is_diagnostic: bool) -> SenderResult {
            self.bodies.lock().unwrap().push(body);
            SenderResult::default()
        }
    }

    fn flag(json: Value) -> FeatureFlag {
        serde_json::from_value(json).unwrap()
    }

    fn client_with_sender() -> (Client, Arc<CapturingSender>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let sender = Arc::new(CapturingSender::default());
        let client = ClientConfig::from_sdk_key("sdk-key")
            .events(
                EventsConfig::new()
                    .with_flush_interval(Duration::from_secs(3600))
                    .with_diagnostic_opt_out(true),
            )
            .event_sender(sender.clone())
            .to_client()
            .unwrap();
        (client, sender)
    }

    #[test]
    fn variation_serves_store_configuration() {
        let (client, _sender) = client_with_sender();
        client.store().init(
            vec![flag(json!({
                "key": "greeting",
                "version": 4,
                "on": true,
                "offVariation": 0,
                "fallthrough": {"variation": 1},
                "variations": ["hi", "hello"],
                "salt": "salt"
            }))],
            vec![],
        );

        let user = User::new("u1");
        assert_eq!(client.string_variation(&user, "greeting", "default"), "hello");
        assert_eq!(client.string_variation(&user, "missing", "default"), "default");

        client.close();
    }

    #[test]
    fn evaluation_events_carry_flag_metadata() {
        let (client, sender) = client_with_sender();
        client.store().init(
            vec![flag(json!({
                "key": "tracked",
                "version": 12,
                "on": true,
                "offVariation": 0,
                "fallthrough": {"variation": 1},
                "variations": [false, true],
                "salt": "salt",
                "trackEvents": true
            }))],
            vec![],
        );

        assert!(client.bool_variation(&User::new("u1"), "tracked", false));
        client.close();

        let events = sender.events();
        let feature = events
            .iter()
            .find(|event| event["kind"] == "feature")
            .expect("tracked flag must emit a feature event");
        assert_eq!(feature["key"], json!("tracked"));
        assert_eq!(feature["version"], json!(12));
        assert_eq!(feature["variation"], json!(1));
        assert_eq!(feature["value"], json!(true));
        assert_eq!(feature["default"], json!(false));
        assert_eq!(feature["reason"]["kind"], json!("FALLTHROUGH"));
    }

    #[test]
    fn prerequisite_evaluations_are_recorded() {
        let (client, sender) = client_with_sender();
        client.store().init(
            vec![
                flag(json!({
                    "key": "dependent",
                    "version": 1,
                    "on": true,
                    "offVariation": 0,
                    "prerequisites": [{"key": "gate", "variation": 1}],
                    "fallthrough": {"variation": 1},
                    "variations": [false, true],
                    "salt": "salt"
                })),
                flag(json!({
                    "key": "gate",
                    "version": 3,
                    "on": true,
                    "offVariation": 0,
                    "fallthrough": {"variation": 1},
                    "variations": [false, true],
                    "salt": "salt",
                    "trackEvents": true
                })),
            ],
            vec![],
        );

        assert!(client.bool_variation(&User::new("u1"), "dependent", false));
        client.close();

        let events = sender.events();
        let prereq = events
            .iter()
            .find(|event| event["kind"] == "feature" && event["key"] == "gate")
            .expect("prerequisite evaluation must emit its own event");
        assert_eq!(prereq["prereqOf"], json!("dependent"));
        assert_eq!(prereq["version"], json!(3));
    }

    #[test]
    fn unknown_flag_evaluation_is_summarized() {
        let (client, sender) = client_with_sender();

        assert!(!client.bool_variation(&User::new("u1"), "missing", false));
        client.close();

        let events = sender.events();
        let summary = events
            .iter()
            .find(|event| event["kind"] == "summary")
            .expect("summary must be delivered on close");
        assert_eq!(
            summary["features"]["missing"]["counters"][0]["unknown"],
            json!(true)
        );
        assert_eq!(summary["features"]["missing"]["default"], json!(false));
    }

    #[test]
    fn close_is_idempotent() {
        let (client, sender) = client_with_sender();
        client.identify(User::new("u1"));
        client.close();
        client.close();

        let identifies = sender
            .events()
            .into_iter()
            .filter(|event| event["kind"] == "identify")
            .count();
        assert_eq!(identifies, 1);
    }
}
