//! Transforms pipeline events and summaries into the on-wire JSON shape.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EventsConfig;
use crate::eval::Reason;
use crate::flag::VariationIndex;
use crate::user::{User, STRING_ATTRIBUTES};

use super::event::{AliasEvent, CustomEvent, EvalEvent, Event};
use super::summarizer::EventSummary;

/// One element of the delivered JSON array. The `kind` tag distinguishes the shapes.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum OutputEvent {
    Feature(FeatureBody),
    Debug(FeatureBody),
    Identify(IdentifyBody),
    Custom(CustomBody),
    Alias(AliasBody),
    Index(IndexBody),
    Summary(SummaryBody),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeatureBody {
    creation_date: u64,
    key: String,
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<VariationIndex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prereq_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<Reason>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdentifyBody {
    creation_date: u64,
    key: String,
    user: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CustomBody {
    creation_date: u64,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metric_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AliasBody {
    creation_date: u64,
    key: String,
    context_kind: String,
    previous_key: String,
    previous_context_kind: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexBody {
    creation_date: u64,
    user: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryBody {
    start_date: u64,
    end_date: u64,
    features: HashMap<String, FlagSummaryBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlagSummaryBody {
    default: Value,
    counters: Vec<CounterBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CounterBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<VariationIndex>,
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    /// Marks a counter whose flag version or variation was not known at evaluation time.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    unknown: bool,
    count: u64,
}

/// Stateless event formatter, shared by the flush workers.
#[derive(Debug, Clone)]
pub(crate) struct EventFormatter {
    inline_users_in_events: bool,
    all_attributes_private: bool,
    private_attribute_names: Vec<String>,
}

impl EventFormatter {
    pub fn new(config: &EventsConfig) -> EventFormatter {
        EventFormatter {
            inline_users_in_events: config.inline_users_in_events,
            all_attributes_private: config.all_attributes_private,
            private_attribute_names: config.private_attribute_names.clone(),
        }
    }

    /// Produce the ordered output list: the full events followed by the summary if non-empty.
    pub fn output_events(&self, events: &[Event], summary: EventSummary) -> Vec<OutputEvent> {
        let mut output: Vec<OutputEvent> = events.iter().map(|event| self.output_event(event)).collect();
        if !summary.is_empty() {
            output.push(OutputEvent::Summary(summary_body(summary)));
        }
        output
    }

    fn output_event(&self, event: &Event) -> OutputEvent {
        match event {
            Event::Eval(eval) => OutputEvent::Feature(self.feature_body(eval, self.inline_users_in_events)),
            // Debug events always carry the user inline.
            Event::Debug(eval) => OutputEvent::Debug(self.feature_body(eval, true)),
            Event::Identify(identify) => OutputEvent::Identify(IdentifyBody {
                creation_date: identify.creation_date,
                key: identify.user.key().to_owned(),
                user: self.user_json(&identify.user),
            }),
            Event::Custom(custom) => OutputEvent::Custom(self.custom_body(custom)),
            Event::Alias(alias) => OutputEvent::Alias(alias_body(alias)),
            Event::Index(index) => OutputEvent::Index(IndexBody {
                creation_date: index.creation_date,
                user: self.user_json(&index.user),
            }),
        }
    }

    fn feature_body(&self, event: &EvalEvent, inline_user: bool) -> FeatureBody {
        let (user, user_key) = self.user_or_key(&event.user, inline_user);
        FeatureBody {
            creation_date: event.creation_date,
            key: event.key.clone(),
            value: event.value.clone(),
            default: event.default_value.clone(),
            variation: event.variation,
            version: event.version,
            prereq_of: event.prereq_of.clone(),
            context_kind: context_kind(&event.user),
            user,
            user_key,
            reason: event.reason.clone(),
        }
    }

    fn custom_body(&self, event: &CustomEvent) -> CustomBody {
        let (user, user_key) = self.user_or_key(&event.user, self.inline_users_in_events);
        CustomBody {
            creation_date: event.creation_date,
            key: event.key.clone(),
            data: event.data.clone(),
            metric_value: event.metric_value,
            context_kind: context_kind(&event.user),
            user,
            user_key,
        }
    }

    fn user_or_key(&self, user: &User, inline: bool) -> (Option<Value>, Option<String>) {
        if inline {
            (Some(self.user_json(user)), None)
        } else {
            (None, Some(user.key().to_owned()))
        }
    }

    /// Serialize a user, applying attribute redaction and then coercing the built-in
    /// attributes to strings.
    fn user_json(&self, user: &User) -> Value {
        let mut object = Map::new();
        let mut redacted: Vec<String> = Vec::new();

        object.insert("key".to_owned(), Value::String(user.key().to_owned()));
        for &name in &STRING_ATTRIBUTES[1..] {
            let Some(value) = user.attribute(name) else {
                continue;
            };
            if self.is_private(user, name) {
                redacted.push(name.to_owned());
            } else {
                object.insert(name.to_owned(), Value::String(coerce_string(&value)));
            }
        }

        if let Some(anonymous) = user.anonymous_flag() {
            object.insert("anonymous".to_owned(), Value::Bool(anonymous));
        }

        let mut custom = Map::new();
        for (name, value) in user.custom_attributes() {
            if self.is_private(user, name) {
                redacted.push(name.clone());
            } else {
                custom.insert(name.clone(), value.clone());
            }
        }
        if !custom.is_empty() {
            object.insert("custom".to_owned(), Value::Object(custom));
        }

        if !redacted.is_empty() {
            redacted.sort();
            object.insert(
                "privateAttrs".to_owned(),
                Value::Array(redacted.into_iter().map(Value::String).collect()),
            );
        }

        Value::Object(object)
    }

    fn is_private(&self, user: &User, name: &str) -> bool {
        self.all_attributes_private
            || self.private_attribute_names.iter().any(|n| n == name)
            || user.private_attribute_names().iter().any(|n| n == name)
    }
}

fn context_kind(user: &User) -> Option<String> {
    user.anonymous().then(|| user.context_kind().to_owned())
}

fn alias_body(event: &AliasEvent) -> AliasBody {
    AliasBody {
        creation_date: event.creation_date,
        key: event.key.clone(),
        context_kind: event.context_kind.clone(),
        previous_key: event.previous_key.clone(),
        previous_context_kind: event.previous_context_kind.clone(),
    }
}

fn summary_body(summary: EventSummary) -> SummaryBody {
    SummaryBody {
        start_date: summary.start_date,
        end_date: summary.end_date,
        features: summary
            .flags
            .into_iter()
            .map(|(key, flag)| {
                let counters = flag
                    .counters
                    .into_iter()
                    .map(|counter| CounterBody {
                        variation: counter.variation,
                        value: counter.value,
                        unknown: counter.version.is_none() || counter.variation.is_none(),
                        version: counter.version,
                        count: counter.count,
                    })
                    .collect();
                (key, FlagSummaryBody { default: flag.default_value, counters })
            })
            .collect(),
    }
}

/// The nine built-in attributes go on the wire as strings no matter how they were supplied.
fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::config::EventsConfig;
    use crate::events::event::{AliasEvent, CustomEvent, EvalEvent, Event, IndexEvent};
    use crate::events::summarizer::EventSummarizer;
    use crate::user::User;

    use super::EventFormatter;

    fn formatter(config: EventsConfig) -> EventFormatter {
        EventFormatter::new(&config)
    }

    fn to_json(formatter: &EventFormatter, events: &[Event]) -> Value {
        serde_json::to_value(formatter.output_events(events, Default::default())).unwrap()
    }

    fn eval_event() -> EvalEvent {
        let mut event = EvalEvent::new(User::new("u1"), "F", json!(true));
        event.creation_date = 1000;
        event.version = Some(9);
        event.variation = Some(0);
        event
    }

    #[test]
    fn feature_event_uses_user_key_when_not_inlining() {
        let formatter = formatter(EventsConfig::new());
        let output = to_json(&formatter, &[Event::Eval(eval_event())]);

        assert_eq!(
            output,
            json!([{
                "kind": "feature",
                "creationDate": 1000,
                "key": "F",
                "value": true,
                "variation": 0,
                "version": 9,
                "userKey": "u1"
            }])
        );
    }

    #[test]
    fn feature_event_inlines_user_when_configured() {
        let formatter = formatter(EventsConfig::new().with_inline_users_in_events(true));
        let output = to_json(&formatter, &[Event::Eval(eval_event())]);

        assert_eq!(output[0]["user"], json!({"key": "u1"}));
        assert_eq!(output[0].get("userKey"), None);
    }

    #[test]
    fn debug_event_always_inlines_user() {
        let formatter = formatter(EventsConfig::new());
        let output = to_json(&formatter, &[Event::Debug(eval_event())]);

        assert_eq!(output[0]["kind"], json!("debug"));
        assert_eq!(output[0]["user"], json!({"key": "u1"}));
        assert_eq!(output[0].get("userKey"), None);
    }

    #[test]
    fn context_kind_present_only_for_anonymous_users() {
        let formatter = formatter(EventsConfig::new());

        let mut anonymous = eval_event();
        anonymous.user = User::new("u1").with_anonymous(true);
        let output = to_json(&formatter, &[Event::Eval(anonymous)]);
        assert_eq!(output[0]["contextKind"], json!("anonymousUser"));

        let output = to_json(&formatter, &[Event::Eval(eval_event())]);
        assert_eq!(output[0].get("contextKind"), None);
    }

    #[test]
    fn alias_event_shape() {
        let formatter = formatter(EventsConfig::new());
        let output = to_json(
            &formatter,
            &[Event::Alias(AliasEvent {
                creation_date: 5,
                key: "u".into(),
                context_kind: "user".into(),
                previous_key: "anon".into(),
                previous_context_kind: "anonymousUser".into(),
            })],
        );

        assert_eq!(
            output,
            json!([{
                "kind": "alias",
                "creationDate": 5,
                "key": "u",
                "contextKind": "user",
                "previousKey": "anon",
                "previousContextKind": "anonymousUser"
            }])
        );
    }

    #[test]
    fn custom_event_omits_null_fields() {
        let formatter = formatter(EventsConfig::new());
        let output = to_json(
            &formatter,
            &[Event::Custom(CustomEvent {
                creation_date: 7,
                user: User::new("u1"),
                key: "clicked".into(),
                data: None,
                metric_value: None,
            })],
        );

        assert_eq!(
            output,
            json!([{
                "kind": "custom",
                "creationDate": 7,
                "key": "clicked",
                "userKey": "u1"
            }])
        );
    }

    #[test]
    fn index_event_carries_full_user() {
        let formatter = formatter(EventsConfig::new());
        let user = User::new("u1").with_email("a@b.c").with_custom("plan", "pro");
        let output = to_json(
            &formatter,
            &[Event::Index(IndexEvent { creation_date: 2, user })],
        );

        assert_eq!(
            output[0]["user"],
            json!({"key": "u1", "email": "a@b.c", "custom": {"plan": "pro"}})
        );
    }

    #[test]
    fn builtin_attributes_are_coerced_to_strings() {
        let formatter = formatter(EventsConfig::new().with_inline_users_in_events(true));
        let mut event = eval_event();
        event.user = User::new("u1").with_country(49).with_name(true);
        let output = to_json(&formatter, &[Event::Eval(event)]);

        assert_eq!(output[0]["user"]["country"], json!("49"));
        assert_eq!(output[0]["user"]["name"], json!("true"));
    }

    #[test]
    fn private_attributes_are_redacted_and_listed() {
        let formatter = formatter(
            EventsConfig::new()
                .with_inline_users_in_events(true)
                .with_private_attribute_name("email"),
        );
        let mut event = eval_event();
        event.user = User::new("u1")
            .with_email("a@b.c")
            .with_name("Grace")
            .with_custom("ssn", "000")
            .with_private_attribute("ssn");
        let output = to_json(&formatter, &[Event::Eval(event)]);

        let user = &output[0]["user"];
        assert_eq!(user.get("email"), None);
        assert_eq!(user.get("custom"), None);
        assert_eq!(user["name"], json!("Grace"));
        assert_eq!(user["privateAttrs"], json!(["email", "ssn"]));
    }

    #[test]
    fn all_attributes_private_keeps_only_key() {
        let formatter = formatter(
            EventsConfig::new()
                .with_inline_users_in_events(true)
                .with_all_attributes_private(true),
        );
        let mut event = eval_event();
        event.user = User::new("u1").with_email("a@b.c").with_custom("plan", "pro");
        let output = to_json(&formatter, &[Event::Eval(event)]);

        let user = &output[0]["user"];
        assert_eq!(user["key"], json!("u1"));
        assert_eq!(user.get("email"), None);
        assert_eq!(user["privateAttrs"], json!(["email", "plan"]));
    }

    #[test]
    fn summary_is_appended_last_with_unknown_markers() {
        let formatter = formatter(EventsConfig::new());
        let mut summarizer = EventSummarizer::default();

        let mut known = eval_event();
        known.default_value = Some(json!(false));
        summarizer.summarize(&Event::Eval(known));

        let mut unknown = EvalEvent::new(User::new("u1"), "G", json!("fallback"));
        unknown.creation_date = 1001;
        summarizer.summarize(&Event::Eval(unknown));

        let output = serde_json::to_value(
            formatter.output_events(&[Event::Eval(eval_event())], summarizer.take()),
        )
        .unwrap();

        assert_eq!(output.as_array().unwrap().len(), 2);
        let summary = &output[1];
        assert_eq!(summary["kind"], json!("summary"));
        assert_eq!(summary["startDate"], json!(1000));
        assert_eq!(summary["endDate"], json!(1001));
        assert_eq!(
            summary["features"]["F"]["counters"],
            json!([{"variation": 0, "value": true, "version": 9, "count": 1}])
        );
        assert_eq!(
            summary["features"]["G"]["counters"],
            json!([{"value": "fallback", "unknown": true, "count": 1}])
        );
    }

    #[test]
    fn counter_without_variation_is_marked_unknown() {
        // A flag that is off with no off variation evaluates to a null detail, so its event has
        // a version but no variation index.
        let formatter = formatter(EventsConfig::new());
        let mut summarizer = EventSummarizer::default();

        let mut event = EvalEvent::new(User::new("u1"), "F", json!("fallback"));
        event.creation_date = 1000;
        event.version = Some(9);
        event.default_value = Some(json!("fallback"));
        summarizer.summarize(&Event::Eval(event));

        let output =
            serde_json::to_value(formatter.output_events(&[], summarizer.take())).unwrap();

        assert_eq!(
            output[0]["features"]["F"]["counters"],
            json!([{"value": "fallback", "version": 9, "unknown": true, "count": 1}])
        );
    }

    #[test]
    fn empty_summary_is_omitted() {
        let formatter = formatter(EventsConfig::new());
        let output = formatter.output_events(&[Event::Eval(eval_event())], Default::default());
        assert_eq!(output.len(), 1);
    }
}
