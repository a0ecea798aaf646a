//! Per-call context
//!
//! Carries the caller's deadline and cancellation signal from the inbound
//! lifecycle call down to outbound HTTP requests and the attach backend.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation for a single lifecycle call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Context with no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach an external cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time left before the deadline; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Timeout for an outbound call: the smaller of `limit` and the time left
    pub fn bounded(&self, limit: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(limit),
            None => limit,
        }
    }

    /// Fail fast when the call is already cancelled or past its deadline
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if matches!(self.remaining(), Some(left) if left.is_zero()) {
            return Err(Error::DeadlineExceeded("call deadline exceeded".into()));
        }
        Ok(())
    }

    /// Run `fut` until it completes, the deadline passes, or the call is cancelled
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let bounded = async {
            match self.remaining() {
                Some(left) => tokio::time::timeout(left, fut)
                    .await
                    .map_err(|_| Error::DeadlineExceeded("call deadline exceeded".into()))?,
                None => fut.await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        }
    }
}
