//! Session builder.
//!
//! Provides a fluent builder API for configuring sessions: where to connect,
//! how ids are generated, and how the dispatcher is driven.

use std::sync::Arc;
use std::time::Duration;

use crate::macros::log_debug;
use crate::{
    // ---
    create_transport,
    DispatchMode,
    Error,
    IdGenerator,
    IdGeneratorPtr,
    Result,
    Session,
    SessionConfig,
    TransportPtr,
    UuidGenerator,
};

/// Builder for creating sessions.
///
/// Accepts either a server URL, from which a transport is created, or an
/// already connected transport. Everything else is optional.
///
/// # Examples
///
/// ## Connect by URL
/// ```no_run
/// use middleware_client::SessionBuilder;
/// use std::time::Duration;
///
/// # async fn example() -> middleware_client::Result<()> {
/// let session = SessionBuilder::new()
///     .url("ws://localhost:8080")
///     .poll_period(Duration::from_millis(20))
///     .request_timeout(Duration::from_secs(30))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Inject a transport and drive the dispatcher yourself
/// ```
/// use middleware_client::{create_memory_transport, DispatchMode, SessionBuilder};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> middleware_client::Result<()> {
/// let (transport, _peer) = create_memory_transport();
///
/// let session = SessionBuilder::new()
///     .transport(transport)
///     .dispatch_mode(DispatchMode::Inline)
///     .build()
///     .await?;
///
/// let runner = session.clone();
/// let task = tokio::spawn(async move { runner.run_dispatcher().await });
/// tokio::task::yield_now().await;
///
/// session.shutdown().await;
/// task.await.expect("dispatcher task")?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    // ---
    transport: Option<TransportPtr>,
    id_generator: Option<IdGeneratorPtr>,
    config: SessionConfig,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a new session builder with default settings.
    pub fn new() -> Self {
        // ---
        Self {
            transport: None,
            id_generator: None,
            config: SessionConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Set the server URL.
    ///
    /// Examples:
    /// - `"ws://localhost:8080"`
    /// - `"wss://middleware.example.com/socket"`
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Use an already connected transport instead of a URL.
    pub fn transport(mut self, transport: TransportPtr) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override how correlation ids are generated.
    ///
    /// Default: random v4 UUIDs.
    pub fn id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Set the interval between dispatcher poll cycles.
    ///
    /// Default: 100ms.
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.config.poll_period = period;
        self
    }

    /// Expire pending requests older than `timeout`.
    ///
    /// Default: pending requests never expire.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Choose who drives the dispatcher loop.
    ///
    /// Default: [`DispatchMode::Spawned`].
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    /// Set how long `shutdown()` waits for a running dispatcher.
    ///
    /// Default: 1s.
    pub fn shutdown_wait(mut self, wait: Duration) -> Self {
        self.config.shutdown_wait = wait;
        self
    }

    /// Build the session (consumes self).
    ///
    /// In [`DispatchMode::Spawned`] the dispatcher is started on the current
    /// tokio runtime before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if neither or both of a URL and a
    /// transport were given, or if the poll period is zero. Returns
    /// [`Error::Transport`] if connecting to the URL fails.
    pub async fn build(self) -> Result<Session> {
        // ---
        if self.config.poll_period.is_zero() {
            return Err(Error::InvalidArgument(
                "poll period must be greater than zero".into(),
            ));
        }

        let transport = match (self.transport, self.config.url.as_deref()) {
            (Some(transport), None) => transport,
            (None, Some(url)) => create_transport(url).await?,
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument(
                    "set either a URL or a transport, not both".into(),
                ));
            }
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "a URL or a transport is required".into(),
                ));
            }
        };

        let id_generator = self
            .id_generator
            .unwrap_or_else(|| Arc::new(UuidGenerator));

        let mode = self.config.dispatch_mode;
        let session = Session::new(transport, self.config, id_generator);

        if mode == DispatchMode::Spawned {
            // Detached; shutdown() observes the loop through the dispatcher state.
            let _task = session.start_dispatching()?;
        }

        log_debug!("session built, dispatch mode {mode:?}");
        Ok(session)
    }
}
