use std::sync::Arc;

use flagkit_core::events::EventSender;
use flagkit_core::{EventsConfig, Result};

use crate::Client;

/// Configuration for [`Client`].
///
/// # Examples
/// ```no_run
/// # use flagkit::ClientConfig;
/// let client = ClientConfig::from_sdk_key("sdk-key")
///     .to_client()
///     .expect("failed to start the client");
/// ```
pub struct ClientConfig {
    pub(crate) sdk_key: String,
    pub(crate) events: EventsConfig,
    pub(crate) event_sender: Option<Arc<dyn EventSender>>,
}

impl ClientConfig {
    /// Create a default configuration using the specified SDK key.
    pub fn from_sdk_key(sdk_key: impl Into<String>) -> ClientConfig {
        ClientConfig {
            sdk_key: sdk_key.into(),
            events: EventsConfig::default(),
            event_sender: None,
        }
    }

    /// Override the event pipeline configuration.
    pub fn events(mut self, events: EventsConfig) -> ClientConfig {
        self.events = events;
        self
    }

    /// Replace the default HTTP event sender, e.g. to capture events in tests or route them
    /// through custom transport.
    pub fn event_sender(mut self, sender: Arc<dyn EventSender>) -> ClientConfig {
        self.event_sender = Some(sender);
        self
    }

    /// Create a new [`Client`] using this configuration.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}
