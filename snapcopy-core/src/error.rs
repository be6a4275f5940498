/*!
Error types for the snapshot copy engine.
*/

use thiserror::Error;

/// Result type used throughout the snapcopy core.
pub type Result<T> = std::result::Result<T, SnapCopyError>;

/// Errors that can occur while copying a snapshot between servers.
#[derive(Error, Debug)]
pub enum SnapCopyError {
    /// Missing or invalid configuration after merging CLI and environment
    #[error("Configuration error: {0}")]
    Config(String),

    /// A server rejected the supplied credential
    #[error("Authentication failed on {server}: {detail}")]
    Authentication { server: String, detail: String },

    /// The snapshot does not exist on the source server
    #[error("Snapshot {snapshot} not found on {server}")]
    NotFound { snapshot: String, server: String },

    /// The export did not become ready within the configured window
    #[error("Export of snapshot {snapshot} not ready after {waited_secs}s")]
    Timeout { snapshot: String, waited_secs: u64 },

    /// Network failure or unexpected response while talking to a server
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// The destination rejected the uploaded archive
    #[error("Import failed (HTTP {status}): {detail}")]
    Import { status: u16, detail: String },

    /// The destination already holds this snapshot
    #[error("Snapshot {snapshot} already exists on the destination")]
    Conflict { snapshot: String },

    /// I/O errors while handling the local archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnapCopyError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new transfer error
    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Self::Transfer(msg.into())
    }

    /// Create a new authentication error
    pub fn authentication<S1: Into<String>, S2: Into<String>>(server: S1, detail: S2) -> Self {
        Self::Authentication {
            server: server.into(),
            detail: detail.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S1: Into<String>, S2: Into<String>>(snapshot: S1, server: S2) -> Self {
        Self::NotFound {
            snapshot: snapshot.into(),
            server: server.into(),
        }
    }

    /// Process exit status for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            SnapCopyError::Config(_) => 2,
            SnapCopyError::Authentication { .. } => 3,
            SnapCopyError::NotFound { .. } => 4,
            SnapCopyError::Timeout { .. } => 5,
            SnapCopyError::Transfer(_) => 6,
            SnapCopyError::Import { .. } => 7,
            SnapCopyError::Conflict { .. } => 8,
            SnapCopyError::Io(_) | SnapCopyError::Json(_) => 1,
        }
    }
}

impl From<reqwest::Error> for SnapCopyError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            Self::Transfer(format!("request to {url} timed out"))
        } else if err.is_connect() {
            Self::Transfer(format!("could not connect to {url}"))
        } else if err.is_decode() {
            Self::Transfer(format!("unexpected response body from {url}: {err}"))
        } else {
            Self::Transfer(format!("request to {url} failed: {err}"))
        }
    }
}
