//! Error categorization for retry decisions and job-level outcomes.
//!
//! Errors are categorized so the Worker Pool and Scheduler can make retry
//! decisions without inspecting error messages:
//! - `Retryable`: transient failures that may succeed on retry.
//! - `AuthExpired`: 401 after a credential was presumed valid; refresh once, retry once.
//! - `Precondition`: If-Match/If-None-Match failed; non-retryable at chunk level.
//! - `AlreadyExists`: overwrite=false and destination exists; terminal as Skipped, not Failed.
//! - `ChecksumMismatch`: post-transfer MD5 mismatch; terminal status depends on check-md5 mode.
//! - `Cancelled`: terminal; does not count as Failed.
//! - `Fatal`: permanent failures (permissions, corrupt plan, bug assertion).
//! - `NoRetry`: not an error condition, but the operation should not be retried.

use std::io;

/// Category of transfer error for retry decision-making.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable,
    AuthExpired,
    Precondition,
    AlreadyExists,
    ChecksumMismatch,
    Cancelled,
    Fatal,
    NoRetry,
}

/// A transfer error with its category, matching the error taxonomy consumed
/// by the Scheduler's commit step and the Worker Pool's retry loop.
#[derive(Debug)]
pub struct TransferError {
    pub message: String,
    pub path: Option<String>,
    pub category: ErrorCategory,
    pub attempts: u8,
}

impl TransferError {
    pub fn new(category: ErrorCategory, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            message: message.into(),
            path,
            category,
            attempts: 0,
        }
    }

    pub fn retryable(message: impl Into<String>, path: Option<String>) -> Self {
        Self::new(ErrorCategory::Retryable, message, path)
    }

    pub fn fatal(message: impl Into<String>, path: Option<String>) -> Self {
        Self::new(ErrorCategory::Fatal, message, path)
    }

    pub fn no_retry(message: impl Into<String>, path: Option<String>) -> Self {
        Self::new(ErrorCategory::NoRetry, message, path)
    }

    pub fn checksum_mismatch(message: impl Into<String>, path: Option<String>) -> Self {
        Self::new(ErrorCategory::ChecksumMismatch, message, path)
    }

    /// Auth-expired errors get exactly one retry, after a synchronous credential refresh.
    pub fn should_retry(&self, max_tries: u8) -> bool {
        match self.category {
            ErrorCategory::Retryable => self.attempts < max_tries,
            ErrorCategory::AuthExpired => self.attempts < 1,
            _ => false,
        }
    }

    pub fn with_attempt(mut self) -> Self {
        self.attempts = self.attempts.saturating_add(1);
        self
    }
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref path) = self.path {
            write!(f, "{}: {}", path, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for TransferError {}

/// Categorize an IO error for retry decisions.
pub fn categorize_io_error(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::WouldBlock => ErrorCategory::Retryable,

        io::ErrorKind::AlreadyExists => ErrorCategory::AlreadyExists,

        io::ErrorKind::PermissionDenied
        | io::ErrorKind::NotFound
        | io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput => ErrorCategory::Fatal,

        io::ErrorKind::WriteZero
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionRefused => ErrorCategory::Fatal,

        _ => ErrorCategory::Fatal,
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_error_should_retry() {
        let err = TransferError::retryable("network timeout", Some("file.txt".to_string()));
        assert!(err.should_retry(3));
    }

    #[test]
    fn fatal_error_should_not_retry() {
        let err = TransferError::fatal("permission denied", Some("file.txt".to_string()));
        assert!(!err.should_retry(3));
    }

    #[test]
    fn retry_limit_exhausted() {
        let mut err = TransferError::retryable("network timeout", Some("file.txt".to_string()));
        err.attempts = 3;
        assert!(!err.should_retry(3));
    }

    #[test]
    fn auth_expired_retries_exactly_once() {
        let err = TransferError::new(ErrorCategory::AuthExpired, "token expired", None);
        assert!(err.should_retry(5));
        let err = err.with_attempt();
        assert!(!err.should_retry(5));
    }

    #[test]
    fn already_exists_is_not_retryable() {
        let err = TransferError::new(ErrorCategory::AlreadyExists, "exists", None);
        assert!(!err.should_retry(5));
    }

    #[test]
    fn checksum_mismatch_is_not_retryable() {
        let err = TransferError::checksum_mismatch("md5 mismatch", Some("f.bin".to_string()));
        assert!(!err.should_retry(5));
    }

    #[test]
    fn io_error_categorization() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(categorize_io_error(&timeout), ErrorCategory::Retryable);

        let perm = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(categorize_io_error(&perm), ErrorCategory::Fatal);

        let exists = io::Error::new(io::ErrorKind::AlreadyExists, "exists");
        assert_eq!(categorize_io_error(&exists), ErrorCategory::AlreadyExists);
    }
}
