//! Client side of the upstream Moodsprite service.
//!
//! Provides a `SpriteUpstream` trait with two transports:
//! - [`GrpcUpstream`] — `moodsprite.MoodspriteService` (the default)
//! - [`HttpUpstream`] — JSON reads and an NDJSON session stream, for HTTP
//!   gateways fronting the service
//!
//! Character and history reads are retried with backoff. A live subscription
//! is exposed as a [`CueSubscription`] yielding `cue` / `error` / `end` events
//! and is never retried: a mid-stream failure surfaces as a single `Error`
//! event and the stream is over.

mod grpc;
mod http;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::{UpstreamConfig, UpstreamTransport};
use crate::models::{CueError, HistoryQuery, LiveCue, SpriteCharacter, SpriteCharacterHistory};

pub use self::grpc::{cue_events, GrpcUpstream};
pub use self::http::{ndjson_events, HttpUpstream, MAX_CUE_LINE_BYTES};

// ============================================================================
// Error and event types
// ============================================================================

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("upstream call failed ({code:?}): {message}")]
    Rpc { code: tonic::Code, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid upstream response: {0}")]
    Decode(String),

    #[error("invalid upstream address '{0}'")]
    InvalidAddress(String),

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

impl UpstreamError {
    /// Server errors and throttling are worth another attempt; client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Status { code, .. } => *code == 429 || *code >= 500,
            UpstreamError::Rpc { code, .. } => matches!(
                code,
                tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            UpstreamError::Http(_) | UpstreamError::Unavailable(_) => true,
            UpstreamError::Decode(_)
            | UpstreamError::InvalidAddress(_)
            | UpstreamError::RetryExhausted { .. } => false,
        }
    }
}

/// One event from a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// A cue arrived. `Err` means it could not be decoded; the subscription
    /// itself is still healthy.
    Cue(Result<LiveCue, CueError>),
    /// Transport failure. Always the last event.
    Error(String),
    /// Upstream finished the session cleanly. Always the last event.
    End,
}

/// A single open push subscription. Dropping it (or calling [`release`])
/// closes the upstream call.
///
/// [`release`]: CueSubscription::release
pub struct CueSubscription {
    events: BoxStream<'static, UpstreamEvent>,
    finished: bool,
}

impl CueSubscription {
    /// Wrap a raw event stream. A stream that stops without an explicit
    /// `End`/`Error` still yields one `End`, and nothing follows a terminal event.
    pub fn new(events: impl Stream<Item = UpstreamEvent> + Send + 'static) -> Self {
        Self {
            events: events.boxed(),
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<UpstreamEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.next().await.unwrap_or(UpstreamEvent::End);
        if matches!(event, UpstreamEvent::Error(_) | UpstreamEvent::End) {
            self.finished = true;
        }
        Some(event)
    }

    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for CueSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CueSubscription")
            .field("finished", &self.finished)
            .finish()
    }
}

// ============================================================================
// SpriteUpstream trait
// ============================================================================

#[async_trait]
pub trait SpriteUpstream: Send + Sync {
    async fn get_character(&self) -> Result<SpriteCharacter, UpstreamError>;

    async fn get_character_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<SpriteCharacterHistory, UpstreamError>;

    /// Open one live cue subscription. Fails only if it cannot be opened.
    async fn subscribe(&self) -> Result<CueSubscription, UpstreamError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Build the client for the configured transport. The gRPC channel connects
/// lazily, so this succeeds while the upstream is still starting.
pub fn connect(config: &UpstreamConfig) -> Result<Arc<dyn SpriteUpstream>, UpstreamError> {
    Ok(match config.transport {
        UpstreamTransport::Grpc => Arc::new(GrpcUpstream::connect_lazy(config.clone())?),
        UpstreamTransport::Http => Arc::new(HttpUpstream::new(config.clone())?),
    })
}

// ============================================================================
// Retry
// ============================================================================

/// Run a read, retrying transient failures with jittered exponential backoff.
/// `max_retries` counts total attempts.
pub(crate) async fn read_with_retry<T, F, Fut>(
    config: &UpstreamConfig,
    what: &str,
    op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let attempts = config.max_retries.max(1);
    let strategy = ExponentialBackoff::from_millis(config.retry_delay_ms.max(1))
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(attempts - 1);

    let result = RetryIf::spawn(strategy, op, |e: &UpstreamError| {
        let retry = e.is_retryable();
        tracing::warn!("Upstream {} failed (retryable: {}): {}", what, retry, e);
        retry
    })
    .await;

    match result {
        Ok(v) => Ok(v),
        Err(e) if e.is_retryable() && attempts > 1 => {
            tracing::error!("Upstream {} failed after {} attempts: {}", what, attempts, e);
            Err(UpstreamError::RetryExhausted { attempts })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_retries: usize) -> UpstreamConfig {
        UpstreamConfig {
            max_retries,
            retry_delay_ms: 1,
            ..UpstreamConfig::new("http://127.0.0.1:50051")
        }
    }

    #[tokio::test]
    async fn test_subscription_without_terminal_event_ends_once() {
        let mut sub = CueSubscription::new(stream::empty());
        assert_eq!(sub.next().await, Some(UpstreamEvent::End));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_nothing_follows_an_error_event() {
        let mut sub = CueSubscription::new(stream::iter(vec![
            UpstreamEvent::Error("reset".into()),
            UpstreamEvent::Cue(Ok(LiveCue::default())),
        ]));
        assert_eq!(sub.next().await, Some(UpstreamEvent::Error("reset".into())));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_read_with_retry_recovers_from_transient_failure() {
        let calls = AtomicUsize::new(0);
        let result = read_with_retry(&config(3), "GetCharacter", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(UpstreamError::Unavailable("starting".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_with_retry_stops_on_permanent_failure() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = read_with_retry(&config(3), "GetCharacter", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(UpstreamError::Rpc {
                    code: tonic::Code::NotFound,
                    message: "Character not loaded".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(UpstreamError::Rpc { code: tonic::Code::NotFound, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_picks_configured_transport() {
        let http = UpstreamConfig {
            transport: UpstreamTransport::Http,
            ..config(1)
        };
        assert_eq!(connect(&http).unwrap().name(), "http");
    }
}
