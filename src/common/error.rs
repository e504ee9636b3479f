use crate::store::RecordKind;
use crate::upgrade::status::UpgradeStatus;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered {status} {status_text}")]
    Status {
        status: u16,
        status_text: String,
        url: String,
        body: String,
    },

    #[error("Failed to parse response JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Can not move an upgrade item from {from} to {to}")]
    InvalidTransition { from: UpgradeStatus, to: &'static str },

    #[error("Another upgrade item request is still in progress")]
    RequestInProgress,

    #[error("Record {id} is a {actual:?}, expected {expected:?}")]
    KindMismatch {
        id: String,
        expected: RecordKind,
        actual: RecordKind,
    },

    #[error("Missing data: {0}")]
    MissingData(String),
}
