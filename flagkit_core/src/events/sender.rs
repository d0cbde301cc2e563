//! Delivery of serialized event payloads to the ingestion service.

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, DATE};
use reqwest::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

const BULK_ENDPOINT: &str = "/bulk";
const DIAGNOSTIC_ENDPOINT: &str = "/diagnostic";

/// Schema version of the event payload format, sent alongside each request.
const EVENT_SCHEMA_VERSION: &str = "3";

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Default)]
pub struct SenderResult {
    /// The service rejected our credentials; the pipeline must stop sending.
    pub must_shutdown: bool,
    /// The server's clock in ms since epoch, from the response `Date` header. Used to judge
    /// whether debug windows are still open.
    pub time_from_server: Option<u64>,
}

/// Delivers event payload bodies. The pipeline only depends on this trait, so tests and
/// embedders can substitute their own transport.
pub trait EventSender: Send + Sync {
    /// Deliver `body` (a JSON array) to the events endpoint, or to the diagnostic endpoint when
    /// `is_diagnostic` is set. `description` identifies the payload in log output.
    fn send_event_data(&self, body: String, description: &str, is_diagnostic: bool) -> SenderResult;

    /// Called once during pipeline shutdown.
    fn stop(&self) {}
}

/// The default [`EventSender`]: a blocking HTTP POST per payload.
///
/// Flush workers are dedicated threads, so the blocking client fits; no retry is attempted
/// beyond what the transport does itself, and a failed batch is lost.
pub struct HttpEventSender {
    // One client for the sender's lifetime; its connections are reused across flushes.
    client: reqwest::blocking::Client,
    events_url: Url,
    diagnostic_url: Url,
    sdk_key: String,
}

impl HttpEventSender {
    pub fn new(events_uri: &str, sdk_key: impl Into<String>) -> Result<HttpEventSender> {
        let base = events_uri.trim_end_matches('/');
        let events_url =
            Url::parse(&format!("{base}{BULK_ENDPOINT}")).map_err(Error::InvalidEventsUri)?;
        let diagnostic_url =
            Url::parse(&format!("{base}{DIAGNOSTIC_ENDPOINT}")).map_err(Error::InvalidEventsUri)?;

        Ok(HttpEventSender {
            client: reqwest::blocking::Client::new(),
            events_url,
            diagnostic_url,
            sdk_key: sdk_key.into(),
        })
    }
}

impl EventSender for HttpEventSender {
    fn send_event_data(&self, body: String, description: &str, is_diagnostic: bool) -> SenderResult {
        let url = if is_diagnostic {
            &self.diagnostic_url
        } else {
            &self.events_url
        };

        log::debug!(target: "flagkit", "delivering {description} to {url}");

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(AUTHORIZATION, self.sdk_key.as_str())
            .header("X-Flagkit-Event-Schema", EVENT_SCHEMA_VERSION)
            .header("X-Flagkit-Payload-Id", Uuid::new_v4().to_string())
            .body(body)
            .send();

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                log::error!(target: "flagkit", "failed to deliver {description}: {err}");
                return SenderResult::default();
            }
        };

        let time_from_server = response
            .headers()
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| chrono::DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.timestamp_millis().max(0) as u64);

        let status = response.status();
        if status.is_success() {
            return SenderResult { must_shutdown: false, time_from_server };
        }

        let unrecoverable = matches!(status.as_u16(), 401 | 403);
        if unrecoverable {
            log::error!(
                target: "flagkit",
                "received {status} while delivering {description}; no further events will be posted. Check your SDK key"
            );
        } else {
            log::error!(
                target: "flagkit",
                "received {status} while delivering {description}; the batch is lost"
            );
        }

        SenderResult { must_shutdown: unrecoverable, time_from_server }
    }
}
