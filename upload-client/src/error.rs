//! Error taxonomy for authorization and uploads.
//!
//! Nothing in this crate retries on its own. Every failure is handed back to the caller with
//! enough structure to decide whether a retry makes sense, and with the platform's own
//! diagnostic text kept verbatim so it can be shown to the operator as-is.

use crate::credential::Platform;
use http::StatusCode;
use std::path::PathBuf;

/// Failures while producing a bearer [`Credential`](crate::Credential).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint could not be reached or did not answer in time.
    ///
    /// The caller may retry with backoff.
    #[error("{platform} token endpoint unreachable: {message}")]
    Transient { platform: Platform, message: String },

    /// The platform (or the operator) refused the authorization attempt.
    #[error("{platform} authorization denied: {message}")]
    Denied { platform: Platform, message: String },

    /// A cached credential expired, could not be refreshed, and no new authorization was given.
    #[error("{platform} credential expired and could not be renewed")]
    Expired { platform: Platform },

    /// The local credential store could not be read or written.
    #[error("credential store at {}: {message}", path.display())]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AuthError {
    pub(crate) fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, message: impl Into<String>, e: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(e),
        }
    }
}

/// Missing or malformed OAuth application configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {name} is not set")]
    MissingVar { name: String },

    #[error("client secret file {}: {message}", path.display())]
    ClientSecret {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("could not build HTTP client")]
    Http(#[from] reqwest::Error),
}

/// Failures of a single upload attempt.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The media file exceeds what the platform accepts. Re-encode before trying again.
    #[error("file is {size} bytes, {platform} accepts at most {max} bytes")]
    SizeLimitExceeded {
        platform: Platform,
        size: u64,
        max: u64,
    },

    #[error("{} is empty", path.display())]
    EmptyFile { path: PathBuf },

    /// The local media file could not be read, or changed underneath the upload.
    #[error("media file {}: {message}", path.display())]
    Media {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The session cannot carry on from its confirmed offset: it is already complete, or the
    /// offset does not start a chunk.
    #[error("{platform} upload session {session_id} cannot continue: {message}")]
    SessionState {
        platform: Platform,
        session_id: String,
        message: String,
    },

    /// The platform refused to open an upload session.
    #[error("{platform} rejected upload session ({}): {platform_message}", describe_status(*http_status, platform_code.as_deref()))]
    Negotiation {
        platform: Platform,
        http_status: Option<StatusCode>,
        platform_code: Option<String>,
        platform_message: String,
    },

    /// A chunk PUT failed. Chunks after `chunk_index` were not attempted.
    #[error("chunk {chunk_index} transfer to {platform} failed ({}): {message}", describe_status(*http_status, None))]
    Transfer {
        platform: Platform,
        chunk_index: usize,
        http_status: Option<StatusCode>,
        message: String,
    },

    /// Every byte reached the platform but the publish/finalize step failed.
    ///
    /// Only the finalize step needs repeating.
    #[error("{platform} finalize failed ({}): {platform_message}", describe_status(*http_status, platform_code.as_deref()))]
    Finalize {
        platform: Platform,
        http_status: Option<StatusCode>,
        platform_code: Option<String>,
        platform_message: String,
    },
}

impl UploadError {
    /// The platform's own diagnostic text, if the failure came from the platform.
    pub fn platform_message(&self) -> Option<&str> {
        match self {
            Self::Negotiation {
                platform_message, ..
            }
            | Self::Finalize {
                platform_message, ..
            } => Some(platform_message),
            Self::Transfer { message, .. } => Some(message),
            Self::Auth(AuthError::Denied { message, .. }) => Some(message),
            _ => None,
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(AuthError::Transient { .. }) => "auth-transient",
            Self::Auth(AuthError::Denied { .. }) => "auth-denied",
            Self::Auth(AuthError::Expired { .. }) => "auth-expired",
            Self::Auth(AuthError::Storage { .. }) => "auth-storage",
            Self::SizeLimitExceeded { .. } => "size-limit-exceeded",
            Self::EmptyFile { .. } => "empty-file",
            Self::Media { .. } => "media",
            Self::SessionState { .. } => "session-state",
            Self::Negotiation { .. } => "negotiation",
            Self::Transfer { .. } => "transfer",
            Self::Finalize { .. } => "finalize",
        }
    }

    /// Whether retrying the same call later could plausibly succeed.
    ///
    /// Only network-level failures qualify; anything the platform answered with a status is
    /// treated as final for this attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(AuthError::Transient { .. }) => true,
            Self::Transfer { http_status, .. } | Self::Finalize { http_status, .. } => {
                http_status.is_none()
            }
            _ => false,
        }
    }

    pub(crate) fn media(path: impl Into<PathBuf>, message: impl Into<String>, e: std::io::Error) -> Self {
        Self::Media {
            path: path.into(),
            message: message.into(),
            source: Some(e),
        }
    }
}

fn describe_status(status: Option<StatusCode>, code: Option<&str>) -> String {
    match (status, code) {
        (Some(s), Some(c)) => format!("HTTP {}, {c}", s.as_u16()),
        (Some(s), None) => format!("HTTP {}", s.as_u16()),
        (None, Some(c)) => c.to_string(),
        (None, None) => "no response".to_string(),
    }
}
