//! # Client
//!
//! Contract of the CloudWatch Logs ingestion client
//!
//! The transport itself (signing, credentials, HTTP) is supplied by the caller as a
//! [tower::Service] through a [ClientFactory]
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_PutLogEvents.html>

use super::Error;
use bytes::Bytes;
use http::StatusCode;
use std::fmt;
use tower::util::BoxCloneService;

/// A single EMF line and the time it describes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    pub message: Bytes,
}

impl LogEvent {
    pub fn new(timestamp: u64, message: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PutLogEventsRequest {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub log_events: Vec<LogEvent>,
    pub sequence_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PutLogEventsResponse {
    pub next_sequence_token: Option<String>,
    pub rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

/// Events of an accepted request that CloudWatch Logs still refused
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RejectedLogEventsInfo {
    pub too_new_log_event_start_index: Option<usize>,
    pub too_old_log_event_end_index: Option<usize>,
    pub expired_log_event_end_index: Option<usize>,
}

/// Failure reported by the ingestion client
///
/// `status` is the HTTP status of the response when there was one, network level failures
/// and timeouts carry none
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientError {
    pub status: Option<StatusCode>,
    pub code: String,
    pub message: String,
}

impl ClientError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.into(),
            message: message.into(),
        }
    }

    /// A failure that never produced a response
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: "NetworkError".into(),
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: None,
            code: "RequestTimeout".into(),
            message: "request timed out".into(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {}): {}", self.code, status.as_u16(), self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ClientError {}

/// The ingestion client, possibly wrapped in a [MiddlewareChain](super::middleware::MiddlewareChain)
pub type LogsService = BoxCloneService<PutLogEventsRequest, PutLogEventsResponse, ClientError>;

/// What the exporter knows when it asks for a client
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub region: String,
}

/// Builds the ingestion client during [Exporter::start](super::Exporter::start)
///
/// Credential or region failures are reported as `Err` and fail the start
pub type ClientFactory = Box<dyn Fn(&ClientSettings) -> Result<LogsService, Error> + Send + Sync>;
