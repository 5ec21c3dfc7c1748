//! Error classification shared by services and routes.

/// Stable, grepable error codes for log lines and client-facing errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Whether repeating the same operation may succeed.
    fn retryable(&self) -> bool {
        false
    }
}
