use thiserror::Error;

/// Failures reported by a [`Backend`](crate::backend::Backend).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{context} failed with HTTP {status}")]
    Status { status: u16, context: String },

    #[error("key '{0}' already exists")]
    Conflict(String),

    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("subscription ended: {0}")]
    SubscriptionEnded(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Why a submission did not get published. Each stage of the file pipeline
/// has its own variant so callers can tell where it stopped.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("file name must not be empty")]
    EmptyFileName,

    #[error("no file selected")]
    NoFileSelected,

    #[error("file upload is disabled for this widget")]
    UploadDisabled,

    #[error("reading file: {0}")]
    ReadFile(#[from] std::io::Error),

    #[error("upload failed: {0}")]
    Upload(#[source] BackendError),

    #[error("resolving public URL failed: {0}")]
    ResolveUrl(#[source] BackendError),

    #[error("publishing post failed: {0}")]
    Write(#[source] BackendError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },

    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
}
