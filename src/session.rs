//! Session: the request façade.
//!
//! A [`Session`] owns one transport, the table of requests awaiting a reply,
//! the unsolicited-message callback, and the dispatcher that pumps inbound
//! traffic between them. Cloning a session is cheap; every clone talks to the
//! same connection. Dropping the last clone stops the dispatcher and closes
//! the connection, just as [`Session::shutdown`] would without the wait.
//!
//! None of the request operations wait for a reply. Each one sends a single
//! `Request` envelope and returns its correlation id; the reply is delivered
//! later to the `on_success` / `on_error` callback of the [`RequestParams`],
//! on the dispatcher task.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, EnvelopeConsumer};
use crate::macros::{log_debug, log_error, log_info, log_warn};
use crate::pending::{lock_ignore_poison, run_callback, PendingRequests};
use crate::{
    // ---
    codec,
    commands,
    ConnectionState,
    CorrelationId,
    DispatcherState,
    Envelope,
    Error,
    IdGeneratorPtr,
    LoginPayload,
    RequestParams,
    Result,
    SessionBuilder,
    SessionConfig,
    TransportPtr,
};

/// Callback for `Request` / `Update` traffic that is not a reply.
pub type MessageCallback = Arc<dyn Fn(&Session, Envelope) + Send + Sync + 'static>;

/// A client session multiplexed over a single connection.
///
/// # Example
///
/// ```no_run
/// use middleware_client::{RequestParams, Session};
///
/// # async fn example() -> middleware_client::Result<()> {
/// let session = Session::connect("ws://localhost:8080").await?;
///
/// session.register_message_callback(|_session, envelope| {
///     println!("{} on {}: {}", envelope.command, envelope.channel, envelope.payload);
/// });
///
/// session
///     .send_request(
///         RequestParams::new("prices").on_success(|reply| println!("reply: {reply}")),
///         "hello",
///     )
///     .await?;
///
/// session.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: Mutex<Option<TransportPtr>>,
    pending: PendingRequests,
    message_callback: Mutex<Option<MessageCallback>>,
    id_generator: IdGeneratorPtr,
    dispatcher: Arc<Dispatcher>,
    config: SessionConfig,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        let previous = self.dispatcher.request_stop();
        if previous != DispatcherState::Idle {
            // A loop was started; it closes its own transport on the way out.
            return;
        }

        let transport = lock_ignore_poison(&self.transport).take();
        let Some(transport) = transport else {
            return;
        };
        if transport.connection_state().is_closed_or_closing() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log_debug!("session dropped before dispatching, closing transport");
                runtime.spawn(async move {
                    if let Err(err) = transport.close().await {
                        log_warn!("failed to close transport: {err}");
                    }
                });
            }
            Err(_) => log_warn!("session dropped outside a runtime, transport left open"),
        }
    }
}

impl Session {
    // ---

    /// Connect to `url` with default settings and start dispatching.
    ///
    /// Shorthand for `SessionBuilder::new().url(url).build()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the connection cannot be established.
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        SessionBuilder::new().url(url).build().await
    }

    pub(crate) fn new(
        transport: TransportPtr,
        config: SessionConfig,
        id_generator: IdGeneratorPtr,
    ) -> Self {
        // ---
        let dispatcher = Dispatcher::new(config.poll_period, config.request_timeout);

        Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(Some(transport)),
                pending: PendingRequests::new(),
                message_callback: Mutex::new(None),
                id_generator,
                dispatcher: Arc::new(dispatcher),
                config,
            }),
        }
    }

    /// Settings this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Install the callback for unsolicited traffic, replacing any previous
    /// one.
    ///
    /// The callback runs on the dispatcher task for every inbound `Request`
    /// or `Update`. Without a callback such messages are logged and dropped.
    pub fn register_message_callback<F>(&self, callback: F)
    where
        F: Fn(&Session, Envelope) + Send + Sync + 'static,
    {
        *lock_ignore_poison(&self.inner.message_callback) = Some(Arc::new(callback));
    }

    // --------------------
    // Dispatching
    // --------------------

    /// Spawn the dispatcher loop on the current tokio runtime.
    ///
    /// Sessions built with [`DispatchMode::Spawned`](crate::DispatchMode)
    /// call this during `build()`. The task holds the session weakly: once
    /// every handle is dropped it stops and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the dispatcher has already been
    /// started or the session has been shut down.
    pub fn start_dispatching(&self) -> Result<JoinHandle<()>> {
        // ---
        let transport = self.dispatch_transport()?;
        self.inner.dispatcher.start()?;

        let dispatcher = self.inner.dispatcher.clone();
        let inner = Arc::downgrade(&self.inner);
        Ok(tokio::spawn(async move {
            dispatcher
                .run_started(transport, || inner.upgrade().map(|inner| Session { inner }))
                .await;
        }))
    }

    /// Drive the dispatcher loop on the calling task until the session is
    /// shut down or the connection drops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the dispatcher has already been
    /// started or the session has been shut down.
    pub async fn run_dispatcher(&self) -> Result<()> {
        // ---
        let transport = self.dispatch_transport()?;
        self.inner.dispatcher.start()?;
        self.inner
            .dispatcher
            .run_started(transport, || Some(self))
            .await;
        Ok(())
    }

    /// Stop dispatching and release the transport.
    ///
    /// Waits up to [`SessionConfig::shutdown_wait`] for a running dispatcher
    /// to finish its cycle, then closes the transport if it is still open.
    /// Requests still pending are dropped without a callback. Idempotent.
    ///
    /// Called from inside a callback, the dispatcher cannot finish until the
    /// callback returns, so the wait runs to its limit.
    pub async fn shutdown(&self) {
        // ---
        let previous = self.inner.dispatcher.request_stop();
        log_debug!("shutdown requested, dispatcher was {previous}");

        if matches!(
            previous,
            DispatcherState::Running | DispatcherState::Stopping
        ) {
            let wait = self.inner.config.shutdown_wait;
            let stopped = tokio::time::timeout(wait, self.inner.dispatcher.wait_stopped()).await;
            if stopped.is_err() {
                log_warn!("dispatcher did not stop within {wait:?}");
            }
        }

        if !self.inner.pending.is_empty() {
            log_debug!(
                "{} request(s) still pending at shutdown",
                self.inner.pending.len()
            );
        }

        let transport = lock_ignore_poison(&self.inner.transport).take();
        if let Some(transport) = transport {
            if !transport.connection_state().is_closed_or_closing() {
                if let Err(err) = transport.close().await {
                    log_warn!("failed to close transport: {err}");
                }
            }
            log_info!("session shut down");
        }
    }

    /// Current dispatcher state.
    pub fn dispatcher_state(&self) -> DispatcherState {
        self.inner.dispatcher.state()
    }

    /// State of the underlying connection; `Closed` once shut down.
    pub fn connection_state(&self) -> ConnectionState {
        lock_ignore_poison(&self.inner.transport)
            .as_ref()
            .map_or(ConnectionState::Closed, |t| t.connection_state())
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// True if `request_id` is still waiting for a reply.
    pub fn is_pending(&self, request_id: &CorrelationId) -> bool {
        self.inner.pending.contains(request_id.as_str())
    }

    /// Forget a pending request. Neither of its callbacks will run.
    ///
    /// Returns `false` if the request was not pending.
    pub fn cancel(&self, request_id: &CorrelationId) -> bool {
        // ---
        let cancelled = self.inner.pending.cancel(request_id.as_str());
        if cancelled {
            log_debug!("cancelled request {request_id}");
        }
        cancelled
    }

    // --------------------
    // Request operations
    // --------------------

    /// Subscribe to the channel named in `params`.
    pub async fn subscribe_to_channel(&self, params: RequestParams) -> Result<CorrelationId> {
        self.request(params, commands::SUBSCRIBE_TO_CHANNEL, String::new(), "")
            .await
    }

    /// Drop a subscription made with [`subscribe_to_channel`](Self::subscribe_to_channel).
    pub async fn remove_subscription(&self, params: RequestParams) -> Result<CorrelationId> {
        self.request(params, commands::REMOVE_SUBSCRIPTION, String::new(), "")
            .await
    }

    /// Send `payload` to one peer on the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `destination` is empty.
    pub async fn send_message_to_channel(
        &self,
        params: RequestParams,
        payload: impl Into<String>,
        destination: &str,
    ) -> Result<CorrelationId> {
        // ---
        if destination.is_empty() {
            return Err(Error::InvalidArgument(
                "send_message_to_channel requires a destination".into(),
            ));
        }
        self.request(params, commands::SEND_MESSAGE, payload.into(), destination)
            .await
    }

    /// Register as a listener on the channel.
    pub async fn add_channel_listener(&self, params: RequestParams) -> Result<CorrelationId> {
        self.request(params, commands::ADD_LISTENER, String::new(), "")
            .await
    }

    /// Send a request to the channel; some peer on it is expected to reply.
    pub async fn send_request(
        &self,
        params: RequestParams,
        payload: impl Into<String>,
    ) -> Result<CorrelationId> {
        self.request(params, commands::SEND_REQUEST, payload.into(), "")
            .await
    }

    /// Publish `payload` to every subscriber of the channel.
    pub async fn publish_message(
        &self,
        params: RequestParams,
        payload: impl Into<String>,
    ) -> Result<CorrelationId> {
        self.request(params, commands::PUBLISH_MESSAGE, payload.into(), "")
            .await
    }

    /// Authenticate with the middleware server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the credentials fail to encode.
    pub async fn login(
        &self,
        params: RequestParams,
        credentials: &LoginPayload,
    ) -> Result<CorrelationId> {
        // ---
        let payload = serde_json::to_string(credentials)?;
        self.request(params, commands::LOGIN, payload, "").await
    }

    /// Answer an inbound `request` by messaging its sender directly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `request` carries no source id.
    pub async fn reply_to(
        &self,
        params: RequestParams,
        request: &Envelope,
        payload: impl Into<String>,
    ) -> Result<CorrelationId> {
        // ---
        if request.source_id.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "cannot reply to {} without a source id",
                request.command
            )));
        }
        self.request(
            params,
            commands::SEND_MESSAGE,
            payload.into(),
            &request.source_id,
        )
        .await
    }

    /// Send an arbitrary command. `destination` may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `command` is empty.
    pub async fn send_command(
        &self,
        params: RequestParams,
        command: &str,
        payload: impl Into<String>,
        destination: &str,
    ) -> Result<CorrelationId> {
        // ---
        if command.is_empty() {
            return Err(Error::InvalidArgument("command must not be empty".into()));
        }
        self.request(params, command, payload.into(), destination)
            .await
    }

    // Build, register, encode, send. The entry is registered before sending so
    // a fast reply always finds it.
    async fn request(
        &self,
        params: RequestParams,
        command: &str,
        payload: String,
        destination: &str,
    ) -> Result<CorrelationId> {
        // ---
        let transport = self.live_transport()?;

        let request_id = self.inner.id_generator.generate();
        let envelope = Envelope::request(request_id.clone(), command, params.channel(), payload)
            .with_destination(destination);
        let text = codec::encode(&envelope)?;

        if let Err(err) = self.inner.pending.register(request_id.as_str(), params) {
            log_error!("cannot register {command}: {err}");
            return Err(err);
        }

        if let Err(err) = transport.send(text).await {
            self.inner.pending.cancel(request_id.as_str());
            log_warn!("failed to send {command} {request_id}: {err}");
            return Err(err);
        }

        log_debug!(
            "sent {command} {request_id} on {:?} to {:?}",
            envelope.channel,
            envelope.destination_id
        );
        Ok(request_id)
    }

    fn live_transport(&self) -> Result<TransportPtr> {
        // ---
        let guard = lock_ignore_poison(&self.inner.transport);
        match guard.as_ref() {
            Some(transport) if !transport.connection_state().is_closed_or_closing() => {
                Ok(transport.clone())
            }
            _ => Err(Error::NoConnection),
        }
    }

    fn dispatch_transport(&self) -> Result<TransportPtr> {
        lock_ignore_poison(&self.inner.transport)
            .clone()
            .ok_or_else(|| Error::InvalidState("session has been shut down".into()))
    }
}

impl EnvelopeConsumer for Session {
    // ---

    fn pending(&self) -> &PendingRequests {
        &self.inner.pending
    }

    fn on_unsolicited(&self, envelope: Envelope) {
        // ---
        // Clone out so the callback may replace itself.
        let callback = lock_ignore_poison(&self.inner.message_callback).clone();
        match callback {
            Some(callback) => {
                let context = format!("message {} {}", envelope.kind, envelope.command);
                run_callback(&context, || callback(self, envelope));
            }
            None => log_debug!(
                "no message callback, dropping {} {}",
                envelope.kind,
                envelope.command
            ),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dispatcher", &self.dispatcher_state())
            .field("connection", &self.connection_state())
            .field("pending", &self.pending_count())
            .finish()
    }
}
