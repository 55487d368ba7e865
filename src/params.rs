//! Per-request parameters supplied by callers of the request operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One-shot reply callback. Receives the reply payload.
pub type ReplyCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Channel scope and reply callbacks for a single request.
///
/// Both callbacks default to no-ops; at most one of them fires, exactly once,
/// on the dispatcher task.
///
/// # Example
///
/// ```
/// use middleware_client::RequestParams;
///
/// let params = RequestParams::new("prices")
///     .on_success(|payload| println!("ok: {payload}"))
///     .on_error(|payload| eprintln!("failed: {payload}"));
///
/// assert_eq!(params.channel(), "prices");
/// ```
pub struct RequestParams {
    // ---
    channel: String,
    on_success: ReplyCallback,
    on_error: ReplyCallback,
}

impl RequestParams {
    /// Parameters for a request scoped to `channel` with no-op callbacks.
    pub fn new(channel: impl Into<String>) -> Self {
        // ---
        Self {
            channel: channel.into(),
            on_success: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        }
    }

    /// Callback invoked with the payload of a `RESPONSE_SUCCESS` reply.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.on_success = Box::new(callback);
        self
    }

    /// Callback invoked with the payload of a `RESPONSE_ERROR` reply.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.on_error = Box::new(callback);
        self
    }

    /// Channel the request is scoped to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn into_parts(self) -> (String, ReplyCallback, ReplyCallback) {
        (self.channel, self.on_success, self.on_error)
    }
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestParams")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Credentials sent with a `DOLOGIN` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginPayload {
    /// Account name.
    pub user_name: String,
    /// Account password.
    pub password: String,
    /// Client application version.
    pub version: String,
    /// Client application name.
    pub app_name: String,
    /// Free-form description of where the client runs.
    pub source: String,
}
