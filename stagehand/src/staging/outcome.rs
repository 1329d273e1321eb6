//! Result of a finished staging run.

use crate::errors::StagingError;

/// What a call to [`crate::staging::StagingTask::start`] produced.
///
/// Carries the earliest pipeline failure rather than the last one: a
/// build failure that was followed by a log-copy failure reports the
/// build failure.
#[derive(Debug)]
pub struct StagingOutcome {
    /// The earliest pipeline failure, when the run did not succeed.
    pub error: Option<StagingError>,
    /// Whether the run reached the after-setup notification point.
    ///
    /// `false` only when the call was rejected outright, such as a second
    /// `start` on the same task.
    pub after_setup_fired: bool,
    /// Whether every pipeline step ran to the end.
    pub completed: bool,
}

impl StagingOutcome {
    /// Returns `true` when the run finished without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the outcome into a plain `Result` for `?`-style callers.
    pub fn into_result(self) -> Result<(), StagingError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
