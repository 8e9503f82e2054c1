//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap protected calls with a hard deadline
//! - Report the deadline that elapsed
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - The wrapped future is dropped on timeout; work it already handed to the
//!   network is abandoned, not necessarily cancelled

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A deadline elapsed before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Run `fut` with a deadline.
pub async fn with_deadline<F: Future>(deadline: Duration, fut: F) -> Result<F::Output, TimedOut> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| TimedOut(deadline))
}
