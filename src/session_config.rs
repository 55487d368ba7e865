//! Public session configuration.
//!
//! This type contains no transport-specific settings beyond the URL; the
//! transport factory interprets the URL into a concrete connection.

use std::time::Duration;

use crate::DispatchMode;

/// Default interval between dispatcher poll cycles.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

/// How long `Session::shutdown` waits for a running dispatcher to stop.
pub const DEFAULT_SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

/// Session configuration and dispatch parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    // ---
    /// Server URL, e.g. `"ws://localhost:8080"`.
    ///
    /// `None` when the transport is injected directly through
    /// [`SessionBuilder::transport`](crate::SessionBuilder::transport).
    pub url: Option<String>,

    /// Interval between dispatcher poll cycles.
    ///
    /// Also bounds how long a cycle can lag behind inbound traffic.
    ///
    /// Default: 100 milliseconds
    pub poll_period: Duration,

    /// Age after which a pending request is dropped and its `on_error`
    /// callback receives `"request timed out"`.
    ///
    /// Default: `None`, pending requests never expire
    pub request_timeout: Option<Duration>,

    /// Who drives the dispatcher loop.
    ///
    /// Default: [`DispatchMode::Spawned`]
    pub dispatch_mode: DispatchMode,

    /// How long `shutdown()` waits for a running dispatcher to acknowledge.
    ///
    /// Default: 1 second
    pub shutdown_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_period: DEFAULT_POLL_PERIOD,
            request_timeout: None,
            dispatch_mode: DispatchMode::default(),
            shutdown_wait: DEFAULT_SHUTDOWN_WAIT,
        }
    }
}

impl SessionConfig {
    /// Create a config for the given server URL with default settings.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the dispatcher poll period.
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Expire pending requests older than `timeout`.
    ///
    /// # Example
    ///
    /// ```
    /// use middleware_client::SessionConfig;
    /// use std::time::Duration;
    ///
    /// let config = SessionConfig::with_url("ws://localhost:8080")
    ///     .with_request_timeout(Duration::from_secs(10));
    /// assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Choose who drives the dispatcher loop.
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    /// Set how long `shutdown()` waits for the dispatcher.
    pub fn with_shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }
}
