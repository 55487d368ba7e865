//! Dispatch ownership.
//!
//! Decides who drives a [`Session`](crate::Session)'s dispatcher loop. Either
//! way the loop is a single task and every callback runs on it.

/// Who runs the dispatcher loop.
///
/// - [`Spawned`](DispatchMode::Spawned): the session spawns the loop itself
///   when it is built.
/// - [`Inline`](DispatchMode::Inline): the caller dedicates a task and awaits
///   [`Session::run_dispatcher`](crate::Session::run_dispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// The session spawns its dispatcher on the current tokio runtime.
    ///
    /// Allows: `shutdown()`
    /// Forbids: `run_dispatcher()`, `start_dispatching()` (already running)
    #[default]
    Spawned,

    /// The caller drives the dispatcher.
    ///
    /// Allows: exactly one of `run_dispatcher()` or `start_dispatching()`
    Inline,
}
