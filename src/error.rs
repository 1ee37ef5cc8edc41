// ABOUTME: Defines all error types for the taskgate library using thiserror.
// ABOUTME: Drain-path misuse surfaces as an error instead of a silent deadlock.

/// Top-level error type for the taskgate library.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// `wait_all_done` was called more than once on the same limiter.
    ///
    /// The drain signal is single-fire and the first caller consumed it; a
    /// later caller would otherwise block forever.
    #[error("drain already awaited on this limiter")]
    DrainAlreadyAwaited,

    /// The collector task stopped without firing the drain signal.
    #[error("collector stopped before signaling drain")]
    CollectorStopped,
}
