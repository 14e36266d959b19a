//! # Pusher
//!
//! Buffers log events for one destination and ships them to CloudWatch Logs in batches
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_PutLogEvents.html>

use super::client::{LogEvent, LogsService, PutLogEventsRequest, PutLogEventsResponse};
use super::error::{classify, Permanence, PushError};
use super::resolver::DestinationKey;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, error, warn};

/// PutLogEvents accepts at most 10,000 events per call
const MAX_EVENTS_PER_REQUEST: usize = 10_000;

/// PutLogEvents accepts at most 1 MiB per call, counting [PER_EVENT_HEADER_BYTES] for each event
const MAX_REQUEST_PAYLOAD_BYTES: usize = 1024 * 1024;

const PER_EVENT_HEADER_BYTES: usize = 26;

/// Largest message of a single event, longer ones are truncated
const MAX_EVENT_PAYLOAD_BYTES: usize = 256 * 1024 - PER_EVENT_HEADER_BYTES;

/// The events of one call may not span more than 24 hours
const MAX_REQUEST_SPAN_MS: u64 = 24 * 60 * 60 * 1000;

const TRUNCATED_SUFFIX: &[u8] = b"[Truncated...]";

/// How failed sends are retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, 0 fails on the first error
    pub max_retries: usize,
    /// Delay before the first retry, doubled for each further retry
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (starting at 1)
    pub fn delay(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as u32;
        self.backoff.saturating_mul(1 << exponent).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Sink for the log events of one destination
///
/// Implementations serialize `add_log_entry` and `force_flush` against their own buffer,
/// pushers of different destinations never wait on each other
#[async_trait]
pub trait Pusher: Send + Sync {
    /// Buffer an event, shipping the current batch first when the event does not fit in it
    ///
    /// An error reports the batch that was shipped to make room, the event itself is buffered
    async fn add_log_entry(&self, event: LogEvent, cancel: &CancellationToken) -> Result<(), PushError>;

    /// Ship whatever is buffered
    async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), PushError>;
}

#[derive(Default)]
struct EventBatch {
    events: Vec<LogEvent>,
    payload_bytes: usize,
    min_timestamp: u64,
    max_timestamp: u64,
}

impl EventBatch {
    fn size_of(event: &LogEvent) -> usize {
        event.message.len() + PER_EVENT_HEADER_BYTES
    }

    fn has_room_for(&self, event: &LogEvent) -> bool {
        if self.events.is_empty() {
            return true;
        }

        let min = self.min_timestamp.min(event.timestamp);
        let max = self.max_timestamp.max(event.timestamp);

        self.events.len() < MAX_EVENTS_PER_REQUEST
            && self.payload_bytes + Self::size_of(event) <= MAX_REQUEST_PAYLOAD_BYTES
            && max - min <= MAX_REQUEST_SPAN_MS
    }

    fn push(&mut self, event: LogEvent) {
        if self.events.is_empty() {
            self.min_timestamp = event.timestamp;
            self.max_timestamp = event.timestamp;
        } else {
            self.min_timestamp = self.min_timestamp.min(event.timestamp);
            self.max_timestamp = self.max_timestamp.max(event.timestamp);
        }
        self.payload_bytes += Self::size_of(&event);
        self.events.push(event);
    }

    fn take(&mut self) -> Vec<LogEvent> {
        std::mem::take(self).events
    }
}

struct PusherState {
    service: LogsService,
    batch: EventBatch,
    sequence_token: Option<String>,
}

/// [Pusher] shipping to CloudWatch Logs through a [LogsService]
pub struct LogPusher {
    key: DestinationKey,
    retry: RetryPolicy,
    state: tokio::sync::Mutex<PusherState>,
}

impl LogPusher {
    pub fn new(key: DestinationKey, service: LogsService, retry: RetryPolicy) -> Self {
        Self {
            key,
            retry,
            state: tokio::sync::Mutex::new(PusherState {
                service,
                batch: EventBatch::default(),
                sequence_token: None,
            }),
        }
    }

    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    /// Wait for the buffer, giving up when `cancel` fires while another caller is sending
    async fn lock_state(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::MutexGuard<'_, PusherState>, PushError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PushError::Canceled),
            guard = self.state.lock() => Ok(guard),
        }
    }

    /// Reject empty events and cut oversized ones down to what PutLogEvents accepts
    fn prepare(&self, event: LogEvent) -> Result<LogEvent, PushError> {
        if event.message.is_empty() {
            return Err(PushError::InvalidEvent("empty log event message"));
        }
        if event.message.len() <= MAX_EVENT_PAYLOAD_BYTES {
            return Ok(event);
        }

        warn!(
            destination = %self.key,
            size = event.message.len(),
            "Truncating log event larger than {MAX_EVENT_PAYLOAD_BYTES} bytes"
        );

        // Cut on a character boundary so the message stays valid UTF-8
        let mut end = MAX_EVENT_PAYLOAD_BYTES - TRUNCATED_SUFFIX.len();
        while end > 0 && (event.message[end] & 0xC0) == 0x80 {
            end -= 1;
        }
        let mut message = BytesMut::with_capacity(end + TRUNCATED_SUFFIX.len());
        message.put_slice(&event.message[..end]);
        message.put_slice(TRUNCATED_SUFFIX);

        Ok(LogEvent {
            timestamp: event.timestamp,
            message: Bytes::from(message),
        })
    }

    /// One PutLogEvents call with retries
    async fn send(
        &self,
        state: &mut PusherState,
        mut events: Vec<LogEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), PushError> {
        if events.is_empty() {
            return Ok(());
        }

        // CloudWatch Logs requires chronological order within a call
        events.sort_by_key(|event| event.timestamp);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let request = PutLogEventsRequest {
                log_group_name: self.key.log_group_name.clone(),
                log_stream_name: self.key.log_stream_name.clone(),
                log_events: events.clone(),
                sequence_token: state.sequence_token.clone(),
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PushError::Canceled),
                outcome = state.service.clone().oneshot(request) => outcome,
            };

            let err = match outcome {
                Ok(response) => {
                    self.accepted(state, &response, events.len());
                    return Ok(());
                }
                Err(err) => err,
            };

            if classify(&err) == Permanence::Permanent {
                error!(destination = %self.key, "PutLogEvents rejected: {err}");
                return Err(PushError::from_client(err, attempts));
            }

            if attempts > self.retry.max_retries {
                error!(destination = %self.key, attempts, "PutLogEvents failed: {err}");
                return Err(PushError::from_client(err, attempts));
            }

            let delay = self.retry.delay(attempts);
            warn!(destination = %self.key, attempts, ?delay, "PutLogEvents failed, retrying: {err}");
            metrics::counter!("emf_exporter_put_log_events_retries").increment(1);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PushError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn accepted(&self, state: &mut PusherState, response: &PutLogEventsResponse, count: usize) {
        debug!(destination = %self.key, count, "Shipped log events");
        metrics::counter!("emf_exporter_log_events_sent").increment(count as u64);

        if let Some(token) = &response.next_sequence_token {
            state.sequence_token = Some(token.clone());
        }
        if let Some(rejected) = &response.rejected_log_events_info {
            warn!(
                destination = %self.key,
                too_new_start = ?rejected.too_new_log_event_start_index,
                too_old_end = ?rejected.too_old_log_event_end_index,
                expired_end = ?rejected.expired_log_event_end_index,
                "CloudWatch Logs rejected part of the batch"
            );
        }
    }
}

#[async_trait]
impl Pusher for LogPusher {
    async fn add_log_entry(&self, event: LogEvent, cancel: &CancellationToken) -> Result<(), PushError> {
        let event = self.prepare(event)?;
        let mut state = self.lock_state(cancel).await?;

        let mut result = Ok(());
        if !state.batch.has_room_for(&event) {
            let events = state.batch.take();
            result = self.send(&mut state, events, cancel).await;
        }
        state.batch.push(event);

        result
    }

    async fn force_flush(&self, cancel: &CancellationToken) -> Result<(), PushError> {
        let mut state = self.lock_state(cancel).await?;
        let events = state.batch.take();
        self.send(&mut state, events, cancel).await
    }
}
