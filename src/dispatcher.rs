//! Dispatcher loop.
//!
//! This module is the glue between a [`Transport`](crate::Transport) and the
//! state that consumes inbound traffic: the pending-request table and the
//! unsolicited-message callback.
//!
//! The dispatcher is responsible for:
//! - polling the transport on a fixed period
//! - decoding each inbound text into an [`Envelope`]
//! - routing responses to the pending-request table and everything else to
//!   the unsolicited-message callback
//! - closing the transport when the loop stops
//!
//! ## State machine
//!
//! ```text
//!   Idle ──start()──▶ Running ──stop──▶ Stopping ──cycle done──▶ Stopped
//!     │                                                            ▲
//!     └──────────────────────────stop──────────────────────────────┘
//! ```
//!
//! A stop is requested either explicitly, because the transport reports
//! `Closing`/`Closed` at the end of a cycle, or because the consumer is gone.
//! The cycle in progress always finishes first.
//!
//! The loop takes its consumer from a closure once per cycle and drops it
//! again before sleeping. A loop fed from a weak reference therefore never
//! keeps its session alive.
//!
//! ## Error handling
//!
//! Malformed inbound text and replies for unknown request ids are dropped and
//! logged. Neither terminates the loop.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::macros::{log_debug, log_error, log_info, log_warn};
use crate::pending::PendingRequests;
use crate::{codec, Envelope, Error, MessageKind, Result, TransportPtr};

/// Lifecycle of a dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Not started yet.
    Idle,
    /// Polling and dispatching.
    Running,
    /// Stop requested; finishing the current cycle.
    Stopping,
    /// Terminal.
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatcherState::Idle => "IDLE",
            DispatcherState::Running => "RUNNING",
            DispatcherState::Stopping => "STOPPING",
            DispatcherState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// A consumer of decoded inbound envelopes.
///
/// Implementors supply the pending-request table that responses complete
/// and the sink for unsolicited `Request`/`Update` traffic.
pub(crate) trait EnvelopeConsumer: Send + Sync {
    /// Table completed by `ResponseSuccess` / `ResponseError` envelopes.
    fn pending(&self) -> &PendingRequests;

    /// Handle a `Request` or `Update` envelope originated by a peer.
    fn on_unsolicited(&self, envelope: Envelope);
}

impl<T: EnvelopeConsumer + ?Sized> EnvelopeConsumer for &T {
    fn pending(&self) -> &PendingRequests {
        (**self).pending()
    }

    fn on_unsolicited(&self, envelope: Envelope) {
        (**self).on_unsolicited(envelope)
    }
}

/// Where a single inbound text ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Handed to the unsolicited-message sink.
    Unsolicited,
    /// Completed the pending request with this id.
    Completed(String),
    /// Reply for an id that is not pending.
    Orphaned(String),
    /// Could not be decoded.
    Malformed,
}

/// Decode one inbound text and route it.
pub(crate) fn dispatch_text<C>(text: &str, consumer: &C) -> Routed
where
    C: EnvelopeConsumer + ?Sized,
{
    // ---
    let envelope = match codec::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            log_warn!("dropping inbound message: {err}");
            return Routed::Malformed;
        }
    };

    match envelope.kind {
        MessageKind::Request | MessageKind::Update => {
            log_debug!(
                "unsolicited {} {} on {:?} from {:?}",
                envelope.kind,
                envelope.command,
                envelope.channel,
                envelope.source_id
            );
            consumer.on_unsolicited(envelope);
            Routed::Unsolicited
        }
        MessageKind::ResponseSuccess | MessageKind::ResponseError => {
            let Envelope {
                kind,
                request_id,
                payload,
                ..
            } = envelope;

            match consumer.pending().complete(&request_id, kind, payload) {
                Ok(()) => Routed::Completed(request_id),
                Err(Error::NoSuchPending(id)) => {
                    log_debug!("no pending request for id: {id}");
                    Routed::Orphaned(id)
                }
                Err(err) => {
                    // complete() only rejects non-response kinds, excluded above
                    log_error!("failed to complete request {request_id}: {err}");
                    Routed::Malformed
                }
            }
        }
    }
}

/// Poll/dispatch loop owner for one session.
pub(crate) struct Dispatcher {
    // ---
    state: watch::Sender<DispatcherState>,
    poll_period: Duration,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    // ---

    pub(crate) fn new(poll_period: Duration, request_timeout: Option<Duration>) -> Self {
        // ---
        let (state, _) = watch::channel(DispatcherState::Idle);
        Self {
            state,
            poll_period,
            request_timeout,
        }
    }

    pub(crate) fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// `Idle → Running`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] from any other state.
    pub(crate) fn start(&self) -> Result<()> {
        // ---
        let mut previous = DispatcherState::Idle;
        let started = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == DispatcherState::Idle {
                *state = DispatcherState::Running;
                true
            } else {
                false
            }
        });

        if started {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "dispatcher cannot start while {previous}"
            )))
        }
    }

    /// Request a stop. Returns the state observed before the request.
    ///
    /// `Running → Stopping`; `Idle → Stopped`; otherwise unchanged.
    pub(crate) fn request_stop(&self) -> DispatcherState {
        // ---
        let mut previous = DispatcherState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                DispatcherState::Running => {
                    *state = DispatcherState::Stopping;
                    true
                }
                DispatcherState::Idle => {
                    *state = DispatcherState::Stopped;
                    true
                }
                DispatcherState::Stopping | DispatcherState::Stopped => false,
            }
        });
        previous
    }

    /// Wait until the loop publishes `Stopped`.
    pub(crate) async fn wait_stopped(&self) {
        // ---
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|state| *state == DispatcherState::Stopped).await;
    }

    /// Run the loop. The caller must have moved the state to `Running`
    /// through [`start`](Self::start).
    ///
    /// `acquire` is called before every cycle; `None` stops the loop.
    pub(crate) async fn run_started<C, F>(&self, transport: TransportPtr, mut acquire: F)
    where
        C: EnvelopeConsumer,
        F: FnMut() -> Option<C>,
    {
        // ---
        log_info!("dispatcher running, poll period {:?}", self.poll_period);

        let mut stop_rx = self.state.subscribe();
        let mut ticker = tokio::time::interval(self.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state() == DispatcherState::Running {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => continue,
            }

            let Some(consumer) = acquire() else {
                log_info!("consumer dropped, stopping dispatcher");
                self.request_stop();
                break;
            };
            self.cycle(&transport, &consumer).await;
            drop(consumer);

            let connection = transport.connection_state();
            if connection.is_closed_or_closing() {
                log_info!("transport is {connection}, stopping dispatcher");
                self.request_stop();
            }
        }

        self.finish(&transport).await;
    }

    async fn cycle<C>(&self, transport: &TransportPtr, consumer: &C)
    where
        C: EnvelopeConsumer + ?Sized,
    {
        // ---
        match transport.poll_once().await {
            Ok(texts) => {
                for text in texts {
                    if let Routed::Completed(id) = dispatch_text(&text, consumer) {
                        log_debug!("completed request {id}");
                    }
                }
            }
            Err(err) => log_warn!("transport poll failed: {err}"),
        }

        if let Some(max_age) = self.request_timeout {
            let expired = consumer.pending().expire(max_age);
            if expired > 0 {
                log_warn!("{expired} pending request(s) timed out");
            }
        }
    }

    async fn finish(&self, transport: &TransportPtr) {
        // ---
        if !transport.connection_state().is_closed_or_closing() {
            if let Err(err) = transport.close().await {
                log_warn!("failed to close transport: {err}");
            }
        }

        self.state.send_replace(DispatcherState::Stopped);
        log_info!("dispatcher stopped");
    }
}
