// src/pending.rs

//! Pending-request table.
//!
//! Maps the correlation id of every outstanding request to the callbacks that
//! should run when its reply arrives. The table is shared between the tasks
//! issuing requests and the dispatcher completing them, so the map lives
//! behind a single mutex; every operation is an O(1) lookup.
//!
//! Removal happens under the lock and callback invocation after it is
//! released. A callback may therefore issue new requests on the same session
//! without deadlocking, while a given entry can still only be removed, and
//! so completed, once.
//!
//! A panicking callback is caught and logged. The entry is already gone by
//! then, and the panic never reaches the dispatcher loop.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::macros::{log_debug, log_error};
use crate::params::ReplyCallback;
use crate::{Error, MessageKind, RequestParams, Result};

/// Payload handed to `on_error` when the expiry sweep drops a request.
pub const TIMEOUT_PAYLOAD: &str = "request timed out";

struct PendingRequest {
    // ---
    channel: String,
    on_success: ReplyCallback,
    on_error: ReplyCallback,
    registered_at: Instant,
}

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Run an application callback, containing any panic it raises.
///
/// Returns false if the callback panicked.
pub(crate) fn run_callback(context: &str, callback: impl FnOnce()) -> bool {
    // ---
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(cause) => {
            log_error!("{context} callback panicked: {}", panic_message(&*cause));
            false
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(msg) = cause.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = cause.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Tracks requests waiting for a reply.
#[derive(Default)]
pub struct PendingRequests {
    // ---
    requests: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingRequests {
    // ---

    /// Create a new empty table.
    pub fn new() -> Self {
        // ---
        Self {
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Register callbacks for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequestId`] if the id is already pending; the
    /// existing entry is left untouched.
    pub fn register(&self, request_id: &str, params: RequestParams) -> Result<()> {
        // ---
        let (channel, on_success, on_error) = params.into_parts();

        let mut requests = lock_ignore_poison(&self.requests);
        if requests.contains_key(request_id) {
            return Err(Error::DuplicateRequestId(request_id.to_owned()));
        }

        requests.insert(
            request_id.to_owned(),
            PendingRequest {
                channel,
                on_success,
                on_error,
                registered_at: Instant::now(),
            },
        );

        Ok(())
    }

    /// Complete the request `request_id` with a reply of the given kind.
    ///
    /// Removes the entry and invokes `on_success` for
    /// [`MessageKind::ResponseSuccess`] or `on_error` for
    /// [`MessageKind::ResponseError`], on the calling task. A panic in the
    /// callback is logged and does not turn into an error.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `kind` is not a response kind; the entry
    ///   stays pending.
    /// - [`Error::NoSuchPending`] if nothing is registered under the id.
    pub fn complete(&self, request_id: &str, kind: MessageKind, payload: String) -> Result<()> {
        // ---
        if !kind.is_response() {
            return Err(Error::InvalidArgument(format!(
                "cannot complete request {request_id} with a {kind} message"
            )));
        }

        let entry = {
            let mut requests = lock_ignore_poison(&self.requests);
            requests.remove(request_id)
        };

        let Some(entry) = entry else {
            return Err(Error::NoSuchPending(request_id.to_owned()));
        };

        log_debug!(
            "completing request {request_id} on channel {:?} with {kind}",
            entry.channel
        );

        let context = format!("reply for request {request_id}");
        match kind {
            MessageKind::ResponseSuccess => run_callback(&context, || (entry.on_success)(payload)),
            _ => run_callback(&context, || (entry.on_error)(payload)),
        };

        Ok(())
    }

    /// Remove a pending request without invoking either callback.
    ///
    /// Returns true if the id was pending.
    pub fn cancel(&self, request_id: &str) -> bool {
        // ---
        lock_ignore_poison(&self.requests)
            .remove(request_id)
            .is_some()
    }

    /// Drop every request registered at least `max_age` ago, invoking its
    /// `on_error` with [`TIMEOUT_PAYLOAD`].
    ///
    /// Returns the number of requests expired.
    pub fn expire(&self, max_age: Duration) -> usize {
        // ---
        let expired: Vec<(String, PendingRequest)> = {
            let mut requests = lock_ignore_poison(&self.requests);
            let ids: Vec<String> = requests
                .iter()
                .filter(|(_, entry)| entry.registered_at.elapsed() >= max_age)
                .map(|(id, _)| id.clone())
                .collect();

            ids.into_iter()
                .filter_map(|id| requests.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (id, entry) in expired {
            log_debug!("request {id} on channel {:?} expired", entry.channel);
            let context = format!("timeout for request {id}");
            run_callback(&context, || (entry.on_error)(TIMEOUT_PAYLOAD.to_owned()));
        }

        count
    }

    /// True if `request_id` is pending.
    pub fn contains(&self, request_id: &str) -> bool {
        lock_ignore_poison(&self.requests).contains_key(request_id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.requests).len()
    }

    /// True if no request is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
