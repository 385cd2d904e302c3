//! Deadline budget for resumable long-running operations.
//!
//! Saving a large document can take longer than a frontend is willing to
//! block. Operations that may run long take a [`Deadline`] and return
//! [`Progress::Timeout`] when it expires; calling again with a fresh
//! deadline resumes where they left off.

use std::time::{Duration, Instant};

/// Outcome of a deadline-bounded operation. Errors travel separately via
/// `Result`, so resumability is not conflated with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The operation ran to completion.
    Done,
    /// The deadline expired; call again with a fresh deadline to resume.
    Timeout,
}

impl Progress {
    pub fn is_done(self) -> bool {
        self == Progress::Done
    }
}

/// A wall-clock budget. `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires: Option<Instant>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Some(Instant::now() + budget),
        }
    }

    /// A deadline that never expires (run to completion).
    pub fn none() -> Self {
        Self { expires: None }
    }

    pub fn expired(&self) -> bool {
        match self.expires {
            Some(t) => Instant::now() >= t,
            None => false,
        }
    }
}
