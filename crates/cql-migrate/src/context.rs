//! Run context carrying cancellation and deadline for one migration run

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{MigrateError, MigrateResult};

/// Cancellation and deadline shared by every network operation of a run
///
/// ```
/// use cql_migrate::RunContext;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let ctx = RunContext::new().with_timeout(Duration::from_secs(30));
/// assert!(ctx.deadline().is_some());
/// assert!(!ctx.is_cancelled());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Abort once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Context with a deadline derived from `timeout` when none is set
    pub(crate) fn or_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.clone().with_timeout(timeout),
            _ => self.clone(),
        }
    }

    /// Fail fast if the run was cancelled or its deadline has passed
    pub(crate) fn check(&self) -> MigrateResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(MigrateError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Race `operation` against cancellation and the deadline
    pub(crate) async fn run<F: Future>(&self, operation: F) -> MigrateResult<F::Output> {
        self.check()?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation)
                    .await
                    .map_err(|_| MigrateError::DeadlineExceeded),
                None => Ok(operation.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(MigrateError::Cancelled),
            result = bounded => result,
        }
    }
}
