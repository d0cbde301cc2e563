use std::sync::Arc;

/// Alias used by fallible SDK operations, fixing the error type to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Things that can go wrong while starting or running the SDK.
///
/// Flag evaluation failures are intentionally absent: the evaluator reports them through
/// [`crate::eval::Reason::Error`] so that producers never observe an error from an evaluation or
/// from recording an event.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid events_uri configuration.
    #[error("invalid events_uri configuration")]
    InvalidEventsUri(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid SDK key.
    #[error("unauthorized, sdk_key is likely invalid")]
    Unauthorized,

    /// An I/O error.
    #[error(transparent)]
    // Arc makes the variant clonable, which std::io::Error itself is not.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
