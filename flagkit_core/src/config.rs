use std::time::Duration;

/// Configuration for the analytics event pipeline ([`crate::events::EventProcessor`]).
// Not implementing `Copy` as several fields are heap-allocated.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// Capacity of both the inbox queue and the output buffer. Values below
    /// [`EventsConfig::MIN_CAPACITY`] are raised to it.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_CAPACITY`].
    pub capacity: usize,
    /// Interval between automatic payload flushes.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_FLUSH_INTERVAL`].
    pub flush_interval: Duration,
    /// Number of recently seen user keys to remember for index-event de-duplication.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_USER_KEYS_CAPACITY`].
    pub user_keys_capacity: usize,
    /// Interval between clears of the user-key cache.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_USER_KEYS_FLUSH_INTERVAL`].
    pub user_keys_flush_interval: Duration,
    /// Interval between periodic diagnostic events.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL`].
    pub diagnostic_recording_interval: Duration,
    /// Disables diagnostic events entirely when true.
    pub diagnostic_opt_out: bool,
    /// When true, full events carry the serialized user inline; otherwise they carry only
    /// `userKey` and a separate index event introduces the user.
    pub inline_users_in_events: bool,
    /// Base URL of the ingestion service. Event payloads go to `{events_uri}/bulk` and
    /// diagnostics to `{events_uri}/diagnostic`.
    pub events_uri: String,
    /// Redact every user attribute except `key` from event output.
    pub all_attributes_private: bool,
    /// Attribute names to redact from event output for all users.
    pub private_attribute_names: Vec<String>,
}

impl EventsConfig {
    /// Lower bound applied to [`EventsConfig::capacity`].
    pub const MIN_CAPACITY: usize = 100;
    /// Default value for [`EventsConfig::capacity`].
    pub const DEFAULT_CAPACITY: usize = 10_000;
    /// Default value for [`EventsConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default value for [`EventsConfig::user_keys_capacity`].
    pub const DEFAULT_USER_KEYS_CAPACITY: usize = 1000;
    /// Default value for [`EventsConfig::user_keys_flush_interval`].
    pub const DEFAULT_USER_KEYS_FLUSH_INTERVAL: Duration = Duration::from_secs(300);
    /// Default value for [`EventsConfig::diagnostic_recording_interval`].
    pub const DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(900);
    /// Default value for [`EventsConfig::events_uri`].
    pub const DEFAULT_EVENTS_URI: &'static str = "https://events.flagkit.io";

    /// Create a new `EventsConfig` using default configuration.
    pub fn new() -> EventsConfig {
        EventsConfig::default()
    }

    /// Update queue and buffer capacity with `capacity`.
    pub fn with_capacity(mut self, capacity: usize) -> EventsConfig {
        self.capacity = capacity;
        self
    }

    /// Update the automatic flush interval with `interval`.
    pub fn with_flush_interval(mut self, interval: Duration) -> EventsConfig {
        self.flush_interval = interval;
        self
    }

    /// Update the user-key cache size with `capacity`.
    pub fn with_user_keys_capacity(mut self, capacity: usize) -> EventsConfig {
        self.user_keys_capacity = capacity;
        self
    }

    /// Update the user-key cache clear interval with `interval`.
    pub fn with_user_keys_flush_interval(mut self, interval: Duration) -> EventsConfig {
        self.user_keys_flush_interval = interval;
        self
    }

    /// Update the diagnostic recording interval with `interval`.
    pub fn with_diagnostic_recording_interval(mut self, interval: Duration) -> EventsConfig {
        self.diagnostic_recording_interval = interval;
        self
    }

    /// Opt out of diagnostic events.
    pub fn with_diagnostic_opt_out(mut self, opt_out: bool) -> EventsConfig {
        self.diagnostic_opt_out = opt_out;
        self
    }

    /// Choose between inline users and `userKey` references in full events.
    pub fn with_inline_users_in_events(mut self, inline: bool) -> EventsConfig {
        self.inline_users_in_events = inline;
        self
    }

    /// Override the ingestion base URL.
    pub fn with_events_uri(mut self, events_uri: impl Into<String>) -> EventsConfig {
        self.events_uri = events_uri.into();
        self
    }

    /// Redact all user attributes except `key`.
    pub fn with_all_attributes_private(mut self, private: bool) -> EventsConfig {
        self.all_attributes_private = private;
        self
    }

    /// Redact the named attribute for all users.
    pub fn with_private_attribute_name(mut self, name: impl Into<String>) -> EventsConfig {
        self.private_attribute_names.push(name.into());
        self
    }

    /// The effective inbox/buffer capacity after applying the lower bound.
    pub(crate) fn effective_capacity(&self) -> usize {
        self.capacity.max(EventsConfig::MIN_CAPACITY)
    }
}

impl Default for EventsConfig {
    fn default() -> EventsConfig {
        EventsConfig {
            capacity: EventsConfig::DEFAULT_CAPACITY,
            flush_interval: EventsConfig::DEFAULT_FLUSH_INTERVAL,
            user_keys_capacity: EventsConfig::DEFAULT_USER_KEYS_CAPACITY,
            user_keys_flush_interval: EventsConfig::DEFAULT_USER_KEYS_FLUSH_INTERVAL,
            diagnostic_recording_interval: EventsConfig::DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL,
            diagnostic_opt_out: false,
            inline_users_in_events: false,
            events_uri: EventsConfig::DEFAULT_EVENTS_URI.to_owned(),
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
        }
    }
}
