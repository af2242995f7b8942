use thiserror::Error;

/// Classification of failures reported by the remote timeline service.
///
/// Transport errors are always attributed to a single identity by the
/// harvester and never abort a batch on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Authentication failure (401/403, bad or expired token)
    Authentication,
    /// Rate limit exceeded and not absorbed by the client's own waiting
    RateLimit,
    /// The requested identity or resource does not exist (404)
    NotFound,
    /// Server error (5xx)
    ServerError,
    /// Network/connection error
    NetworkError,
    /// Request exceeded the configured timeout
    Timeout,
    /// Response body could not be interpreted
    MalformedResponse,
    /// Unknown or unclassified error
    Unknown,
}

/// Structured error details from the remote timeline service.
#[derive(Debug, Clone)]
pub struct TransportErrorDetails {
    /// The specific error category
    pub kind: TransportErrorKind,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (0 when no response was received)
    pub status_code: u16,
}

impl TransportErrorDetails {
    /// Create a new TransportErrorDetails
    pub fn new(kind: TransportErrorKind, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code,
        }
    }

    /// Shorthand for a response the harvester cannot make sense of.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::MalformedResponse, message, 0)
    }
}

impl std::fmt::Display for TransportErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.status_code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "HTTP {}: {}", self.status_code, self.message)
        }
    }
}

/// Application-wide error types.
///
/// Batch-level errors (`InvalidIdentity`, `MixedAddressMode`, `EmptyBatch`)
/// are raised before any request is made. Per-identity errors (`Transport`,
/// `SinkWrite`) are caught by the harvest orchestrator and recorded in the
/// ledger. A `LedgerError` is fatal to the run, since continuing without a
/// durable checkpoint would break resumability.
///
/// # Examples
///
/// ```
/// use mneme_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::InvalidIdentity("   ".to_string()))
/// }
/// assert!(example().is_err());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// A raw identity could not be normalized (empty, whitespace-only,
    /// or not numeric in id mode).
    #[error("Invalid identity: '{0}'")]
    InvalidIdentity(String),

    /// A batch mixed handle-addressed and id-addressed identities.
    #[error("Mixing of handles and numeric ids in one batch is not supported")]
    MixedAddressMode,

    /// A batch operation was called without any identity.
    #[error("No identities provided")]
    EmptyBatch,

    /// The remote timeline service failed.
    #[error("Transport error: {0}")]
    Transport(TransportErrorDetails),

    /// Writing harvested items to the sink failed.
    #[error("Sink write error: {0}")]
    SinkWrite(String),

    /// Reading or persisting the progress ledger failed.
    #[error("Ledger error: {0}")]
    LedgerError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Builds a transport error from its parts.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>, status_code: u16) -> Self {
        AppError::Transport(TransportErrorDetails::new(kind, message, status_code))
    }

    /// Returns the transport error kind, if this is a transport error.
    pub fn transport_kind(&self) -> Option<&TransportErrorKind> {
        match self {
            AppError::Transport(details) => Some(&details.kind),
            _ => None,
        }
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Transport(details) => match details.kind {
                TransportErrorKind::Authentication => {
                    "The API rejected the credentials.\n   Check your MNEME_BEARER_TOKEN environment variable."
                        .to_string()
                }
                TransportErrorKind::RateLimit => {
                    "Rate limit reached and retries exhausted.\n   Wait for the window to reset, then run again; progress is kept in the ledger."
                        .to_string()
                }
                TransportErrorKind::NetworkError => format!(
                    "Network error: {}\n   Check your internet connection and MNEME_API_URL.",
                    details.message
                ),
                TransportErrorKind::Timeout => {
                    "Request timed out. The API may be slow or unreachable.".to_string()
                }
                _ => self.to_string(),
            },
            AppError::MixedAddressMode => {
                "The batch contains both handles and numeric ids.\n   Use --ids for numeric ids, and keep one kind per targets file."
                    .to_string()
            }
            AppError::EmptyBatch => {
                "No identities to process.\n   Check that the targets file has at least one non-comment line."
                    .to_string()
            }
            AppError::LedgerError(msg) => format!(
                "Cannot persist harvest progress: {}\n   Check that the ledger path is writable.",
                msg
            ),
            AppError::SinkWrite(msg) => format!(
                "Cannot write to output: {}\n   Check disk space and the output path.",
                msg
            ),
            AppError::ConfigError(msg) => format!(
                "Configuration error: {}\n   Check your configuration file.",
                msg
            ),
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is transient and retrying later may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// use mneme_core::error::{AppError, TransportErrorKind};
    ///
    /// let err = AppError::transport(TransportErrorKind::ServerError, "bad gateway", 502);
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::transport(TransportErrorKind::NotFound, "no such user", 404);
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transport(details) => matches!(
                details.kind,
                TransportErrorKind::RateLimit
                    | TransportErrorKind::ServerError
                    | TransportErrorKind::NetworkError
                    | TransportErrorKind::Timeout
            ),
            _ => false,
        }
    }
}
