//! Diagnostic events describing the SDK's own behavior: an init event at startup and periodic
//! counters about dropped and de-duplicated events.

use serde::Serialize;
use uuid::Uuid;

use crate::config::EventsConfig;

use super::event::now_millis;

/// Identifies one SDK instance across its diagnostic events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiagnosticId {
    diagnostic_id: String,
    sdk_key_suffix: String,
}

impl DiagnosticId {
    fn new(sdk_key: &str) -> DiagnosticId {
        let suffix_start = sdk_key.len().saturating_sub(6);
        DiagnosticId {
            diagnostic_id: Uuid::new_v4().to_string(),
            sdk_key_suffix: sdk_key[suffix_start..].to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticConfigData {
    events_capacity: usize,
    events_flush_interval_millis: u64,
    user_keys_capacity: usize,
    user_keys_flush_interval_millis: u64,
    diagnostic_recording_interval_millis: u64,
    inline_users_in_events: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformData {
    name: &'static str,
    os_arch: &'static str,
    os_name: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SdkData {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiagnosticInitEvent {
    kind: &'static str,
    creation_date: u64,
    id: DiagnosticId,
    configuration: DiagnosticConfigData,
    platform: PlatformData,
    sdk: SdkData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiagnosticPeriodicEvent {
    kind: &'static str,
    creation_date: u64,
    id: DiagnosticId,
    data_since_date: u64,
    dropped_events: u64,
    deduplicated_users: u64,
    events_in_last_batch: u64,
}

/// Accumulates the identity and window state behind diagnostic events. Owned by the
/// dispatcher, which supplies the counters.
#[derive(Debug)]
pub(crate) struct DiagnosticsAccumulator {
    id: DiagnosticId,
    config: DiagnosticConfigData,
    data_since_date: u64,
}

impl DiagnosticsAccumulator {
    pub fn new(config: &EventsConfig, sdk_key: &str) -> DiagnosticsAccumulator {
        DiagnosticsAccumulator {
            id: DiagnosticId::new(sdk_key),
            config: DiagnosticConfigData {
                events_capacity: config.effective_capacity(),
                events_flush_interval_millis: config.flush_interval.as_millis() as u64,
                user_keys_capacity: config.user_keys_capacity,
                user_keys_flush_interval_millis: config.user_keys_flush_interval.as_millis() as u64,
                diagnostic_recording_interval_millis: config
                    .diagnostic_recording_interval
                    .as_millis() as u64,
                inline_users_in_events: config.inline_users_in_events,
            },
            data_since_date: now_millis(),
        }
    }

    pub fn create_init_event(&self) -> DiagnosticInitEvent {
        DiagnosticInitEvent {
            kind: "diagnostic-init",
            creation_date: now_millis(),
            id: self.id.clone(),
            configuration: self.config.clone(),
            platform: PlatformData {
                name: "rust",
                os_arch: std::env::consts::ARCH,
                os_name: std::env::consts::OS,
            },
            sdk: SdkData {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    /// Build the periodic event for the window ending now and start a new window.
    pub fn create_periodic_event_and_reset(
        &mut self,
        dropped_events: u64,
        deduplicated_users: u64,
        events_in_last_batch: u64,
    ) -> DiagnosticPeriodicEvent {
        let now = now_millis();
        let event = DiagnosticPeriodicEvent {
            kind: "diagnostic",
            creation_date: now,
            id: self.id.clone(),
            data_since_date: self.data_since_date,
            dropped_events,
            deduplicated_users,
            events_in_last_batch,
        };
        self.data_since_date = now;
        event
    }
}
