//! Live cue relay.
//!
//! One relay connection = one upstream subscription + one outbound SSE stream +
//! one session record. The loop reacts to three sources (upstream events,
//! client abort, server shutdown); whichever fires first decides the close
//! reason, and a single teardown releases everything.
//!
//! States: `Init → Streaming → Closing → Closed`.

use std::time::Instant;

use moodsprite_core::models::{Cue, Diagnostic, InteractionLog};
use moodsprite_core::{CueSubscription, SessionManager, SpriteUpstream, UpstreamError, UpstreamEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encoder::Outbound;

pub const STREAM_ENDPOINT: &str = "/api/stream";
const STREAM_METHOD: &str = "SSE";

/// Outbound messages buffered per connection before the relay waits on the client.
pub const OUTBOUND_BUFFER: usize = 32;

/// Result of handing one message to the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    ClientGone,
    Shutdown,
}

/// A client that stops reading fills the buffer and parks `send`; shutdown
/// must still get through.
async fn send_or_shutdown(
    outbound: &mpsc::Sender<Outbound>,
    message: Outbound,
    shutdown: &CancellationToken,
) -> Delivery {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Delivery::Shutdown,
        sent = outbound.send(message) => match sent {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::ClientGone,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    Streaming,
    Closing,
    Closed,
}

/// The trigger that moved the connection into `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UpstreamEnd,
    UpstreamError,
    ClientAbort,
    Shutdown,
}

/// Request metadata carried into interaction logs.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub session_id: Uuid,
    pub delivered: u64,
    pub reason: CloseReason,
}

// ============================================================================
// Session guard
// ============================================================================

/// Owns the decision to close one session. `close` is idempotent, and a guard
/// dropped without closing (task aborted mid-await) closes in the background.
pub struct SessionGuard {
    sessions: SessionManager,
    session_id: Uuid,
    closed: bool,
}

impl SessionGuard {
    pub fn new(sessions: SessionManager, session_id: Uuid) -> Self {
        Self {
            sessions,
            session_id,
            closed: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sessions.end_session(self.session_id).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let sessions = self.sessions.clone();
        let session_id = self.session_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { sessions.end_session(session_id).await });
            }
            Err(_) => tracing::warn!("Session {} dropped outside a runtime; left open", session_id),
        }
    }
}

// ============================================================================
// Relay connection
// ============================================================================

/// A relay connection that has passed `Init`: session created and upstream
/// subscription open.
pub struct RelayConnection {
    user_id: String,
    client: ClientInfo,
    guard: SessionGuard,
    subscription: CueSubscription,
    state: RelayState,
    delivered: u64,
}

impl RelayConnection {
    /// Create the session and open the subscription. If the subscription cannot
    /// be opened the session is closed again and the error returned; no stream
    /// should be started.
    pub async fn open(
        sessions: &SessionManager,
        upstream: &dyn SpriteUpstream,
        user_id: &str,
        client: ClientInfo,
    ) -> Result<Self, UpstreamError> {
        let session_id = sessions.create_session(user_id).await;
        let mut guard = SessionGuard::new(sessions.clone(), session_id);

        let subscription = match upstream.subscribe().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    "Failed to open {} cue subscription for session {}: {}",
                    upstream.name(),
                    session_id,
                    e
                );
                guard.close().await;
                return Err(e);
            }
        };

        tracing::info!("Relay started for user {}, session {}", user_id, session_id);

        Ok(Self {
            user_id: user_id.to_string(),
            client,
            guard,
            subscription,
            state: RelayState::Init,
            delivered: 0,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.guard.session_id()
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    fn transition(&mut self, next: RelayState) {
        tracing::debug!(
            "Relay session {}: {:?} -> {:?}",
            self.guard.session_id(),
            self.state,
            next
        );
        self.state = next;
    }

    fn interaction(&self, status_code: u16) -> InteractionLog {
        InteractionLog {
            session_id: Some(self.guard.session_id()),
            user_agent: self.client.user_agent.clone(),
            ip_address: self.client.ip_address.clone(),
            ..InteractionLog::new(&self.user_id, STREAM_ENDPOINT, STREAM_METHOD, status_code)
        }
    }

    /// Record that the stream was accepted.
    pub async fn log_start(&mut self) {
        self.guard.sessions.log_interaction(self.interaction(200)).await;
    }

    /// Pump upstream events to `outbound` until the first close trigger, then
    /// tear down.
    pub async fn run(
        mut self,
        outbound: mpsc::Sender<Outbound>,
        shutdown: CancellationToken,
    ) -> RelayOutcome {
        let started = Instant::now();
        self.transition(RelayState::Streaming);

        let reason = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break CloseReason::Shutdown,
                _ = outbound.closed() => break CloseReason::ClientAbort,
                ev = self.subscription.next() => ev,
            };

            match event {
                None | Some(UpstreamEvent::End) => break CloseReason::UpstreamEnd,
                Some(UpstreamEvent::Error(message)) => {
                    tracing::error!(
                        "Upstream stream error on session {}: {}",
                        self.guard.session_id(),
                        message
                    );
                    // The stream is closing either way; a failed send just means
                    // the client left first.
                    let diagnostic = Outbound::Diagnostic(Diagnostic::stream(message));
                    let _ = send_or_shutdown(&outbound, diagnostic, &shutdown).await;
                    break CloseReason::UpstreamError;
                }
                Some(UpstreamEvent::Cue(live)) => {
                    let mapped = live.and_then(Cue::try_from);
                    let sent = match mapped {
                        Ok(cue) => self.deliver(&outbound, cue, &shutdown).await,
                        Err(e) => {
                            tracing::warn!(
                                "Error processing keyframe cue on session {}: {}",
                                self.guard.session_id(),
                                e
                            );
                            let diagnostic =
                                Outbound::Diagnostic(Diagnostic::processing(e.to_string()));
                            send_or_shutdown(&outbound, diagnostic, &shutdown).await
                        }
                    };
                    match sent {
                        Delivery::Delivered => {}
                        Delivery::ClientGone => break CloseReason::ClientAbort,
                        Delivery::Shutdown => break CloseReason::Shutdown,
                    }
                }
            }
        };

        self.transition(RelayState::Closing);
        let outcome = self.teardown(outbound, reason).await;
        tracing::info!(
            "Relay closed for session {} after {:?}: {:?}, {} keyframes served",
            outcome.session_id,
            started.elapsed(),
            outcome.reason,
            outcome.delivered
        );
        outcome
    }

    /// Forward one cue, then count it. Only a delivered cue is counted.
    async fn deliver(
        &mut self,
        outbound: &mpsc::Sender<Outbound>,
        cue: Cue,
        shutdown: &CancellationToken,
    ) -> Delivery {
        let keyframe_uuid = cue.keyframe_uuid.clone();
        match send_or_shutdown(outbound, Outbound::Cue(cue), shutdown).await {
            Delivery::Delivered => {}
            other => return other,
        }
        self.delivered += 1;

        let session_id = self.guard.session_id();
        self.guard.sessions.record_delivery(session_id).await;

        let log = InteractionLog {
            keyframe_uuid: Some(keyframe_uuid),
            ..self.interaction(200)
        };
        self.guard.sessions.log_interaction(log).await;
        Delivery::Delivered
    }

    /// Release the subscription, close the session, then close the outbound
    /// stream. Runs once per connection.
    async fn teardown(self, outbound: mpsc::Sender<Outbound>, reason: CloseReason) -> RelayOutcome {
        let Self {
            subscription,
            mut guard,
            delivered,
            ..
        } = self;

        subscription.release();
        guard.close().await;
        drop(outbound);

        tracing::debug!(
            "Relay session {}: {:?} -> {:?}",
            guard.session_id(),
            RelayState::Closing,
            RelayState::Closed
        );

        RelayOutcome {
            session_id: guard.session_id(),
            delivered,
            reason,
        }
    }
}
