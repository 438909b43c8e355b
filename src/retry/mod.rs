//! Retry with exponential backoff for transient failures.
//!
//! Every data-access call in the API layer goes through [`with_retry`]. An
//! operation is attempted once and then re-attempted up to
//! `max_retries` times while its failure classifies as transient:
//!
//! ```text
//! Attempting --ok--------------------------------> Succeeded
//! Attempting --transient, budget left--> Waiting --delay--> Attempting
//! Attempting --permanent or budget spent--------> Exhausted (NetworkError)
//! ```
//!
//! The wait is a `tokio::time::sleep`, so only the awaiting task is suspended.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Backoff schedule and retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2,
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Same schedule with a different retry budget
    pub fn with_budget(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    /// Delay before retry number `attempt_index` (0 for the first retry):
    /// `min(max_delay, base_delay * multiplier^attempt_index)`
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt_index);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Classification of a failure as transient (worth retrying) or permanent.
pub trait Transient {
    /// Whether the failure looks like a passing infrastructure problem
    fn is_transient(&self) -> bool;

    /// HTTP-equivalent status carried by the failure, if any
    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// Terminal failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct NetworkError {
    /// Last underlying message, annotated with the attempt count
    pub message: String,
    /// Classification of the last failure
    pub retryable: bool,
    /// Status propagated from the cause, 500 when it carried none
    pub status_code: u16,
    /// Number of times the operation was invoked
    pub attempts: u32,
}

/// Run `operation`, retrying transient failures according to `policy`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, NetworkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut attempt_index: u32 = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt_index > 0 {
                    tracing::debug!(attempts = attempt_index + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let attempts = attempt_index + 1;
        let retryable = error.is_transient();

        if !retryable || attempt_index >= policy.max_retries {
            let status_code = error.status_code().unwrap_or(500);
            if retryable {
                tracing::error!(attempts, error = %error, "Operation failed, retry budget exhausted");
            }
            return Err(NetworkError {
                message: format!("{} (after {} attempt{})", error, attempts, if attempts == 1 { "" } else { "s" }),
                retryable,
                status_code,
                attempts,
            });
        }

        let delay = policy.delay_for(attempt_index);
        tracing::warn!(
            attempt = attempt_index,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt_index += 1;
    }
}

fn is_transient_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotFound
            | io::ErrorKind::TimedOut
            | io::ErrorKind::BrokenPipe
    )
}

fn message_looks_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection")
}

impl Transient for io::Error {
    fn is_transient(&self) -> bool {
        is_transient_io_kind(self.kind()) || message_looks_transient(&self.to_string())
    }
}

impl Transient for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::Io(e) => e.is_transient(),
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => {
                // SQLITE_BUSY / SQLITE_LOCKED
                let msg = db_err.message();
                msg.contains("database is locked") || msg.contains("busy") || message_looks_transient(msg)
            }
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::Decode(_) => false,
            other => message_looks_transient(&other.to_string()),
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            sqlx::Error::RowNotFound => Some(404),
            sqlx::Error::PoolTimedOut => Some(503),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    Some(409)
                } else if msg.contains("database is locked") || msg.contains("busy") {
                    Some(503)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
