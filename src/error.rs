//! # Errors
//!
//! Every failure the pipeline surfaces carries a [Permanence] tag so that callers with their own
//! retry policy can tell "will never succeed" from "may succeed later" without looking at
//! transport details

use super::client::ClientError;
use super::Error;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permanence {
    /// Retrying the same request can not succeed
    Permanent,
    /// Retrying may succeed
    Transient,
}

/// Classify an ingestion failure by its HTTP status
///
/// Any 4xx is a client side fault and permanent, everything else including a missing status
/// (network failure, timeout) is transient
pub fn classify(err: &ClientError) -> Permanence {
    match err.status {
        Some(status) if status.is_client_error() => Permanence::Permanent,
        _ => Permanence::Transient,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("attribute {attribute} for placeholder {{{placeholder}}} is missing")]
    MissingAttribute { placeholder: String, attribute: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("failed to resolve log destination: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("log events rejected: {0}")]
    Rejected(#[source] ClientError),
    #[error("failed to put log events after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: ClientError,
    },
    #[error("push canceled")]
    Canceled,
    #[error("invalid log event: {0}")]
    InvalidEvent(&'static str),
    #[error("failed to encode EMF event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write EMF event: {0}")]
    Io(#[from] std::io::Error),
    #[error("exporter is not running")]
    NotRunning,
}

impl PushError {
    /// Map a client failure to the matching variant, `attempts` is the number of calls made
    pub fn from_client(err: ClientError, attempts: usize) -> Self {
        match classify(&err) {
            Permanence::Permanent => PushError::Rejected(err),
            Permanence::Transient => PushError::RetriesExhausted { attempts, source: err },
        }
    }

    pub fn permanence(&self) -> Permanence {
        match self {
            PushError::Resolution(_)
            | PushError::Rejected(_)
            | PushError::InvalidEvent(_)
            | PushError::Encode(_)
            | PushError::NotRunning => Permanence::Permanent,
            PushError::RetriesExhausted { .. } | PushError::Canceled | PushError::Io(_) => Permanence::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.permanence() == Permanence::Permanent
    }
}

/// Every error of one push or shutdown
#[derive(Debug)]
pub struct ExportError {
    errors: Vec<PushError>,
}

impl ExportError {
    pub fn new(errors: Vec<PushError>) -> Self {
        Self { errors }
    }

    /// `Ok` when there is nothing to report
    pub fn from_errors(errors: Vec<PushError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::new(errors))
        }
    }

    pub fn errors(&self) -> &[PushError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<PushError> {
        self.errors
    }

    /// Permanent as soon as one contributing error is
    pub fn is_permanent(&self) -> bool {
        self.errors.iter().any(PushError::is_permanent)
    }

    pub fn permanence(&self) -> Permanence {
        if self.is_permanent() {
            Permanence::Permanent
        } else {
            Permanence::Transient
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_permanent() {
            f.write_str("Permanent error: ")?;
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExportError {}

impl From<PushError> for ExportError {
    fn from(err: PushError) -> Self {
        Self::new(vec![err])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no region configured")]
    MissingRegion,
    #[error("failed to create log ingestion client: {0}")]
    Client(#[source] Error),
    #[error("middleware extension {0} not found")]
    MiddlewareNotFound(String),
    #[error("extension {0} is not a middleware")]
    NotMiddleware(String),
    #[error("exporter already started")]
    AlreadyStarted,
    #[error("exporter has been shut down")]
    ShutDown,
}
