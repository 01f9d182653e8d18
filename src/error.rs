//! Error types for join construction and execution.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A fallible reservation failed while building an in-memory structure.
    #[error("out of memory while building {structure}")]
    OutOfMemory { structure: &'static str },

    /// A row is narrower than the configured key column.
    #[error("key column {index} out of range for row with {width} fields")]
    KeyColumnOutOfRange { index: usize, width: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operator used before open()")]
    NotOpen,

    #[error("operator already opened")]
    AlreadyOpen,

    /// `open()` failed earlier; the operator holds no usable state.
    #[error("build phase failed, operator is unusable")]
    BuildFailed,

    /// A probe-side error was already returned; later rows are not produced.
    #[error("probe phase failed, operator is unusable")]
    ProbeFailed,
}

impl Error {
    /// Maps a failed reservation to [`Error::OutOfMemory`] for `structure`.
    pub(crate) fn oom(structure: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |_| Self::OutOfMemory { structure }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oom_maps_reservation_failure() {
        let mut v: Vec<u64> = Vec::new();
        let err = v.try_reserve(usize::MAX).map_err(Error::oom("bit vector"));
        assert_eq!(
            err,
            Err(Error::OutOfMemory {
                structure: "bit vector"
            })
        );
    }

    #[test]
    fn messages_name_the_problem() {
        let e = Error::KeyColumnOutOfRange { index: 3, width: 2 };
        assert_eq!(e.to_string(), "key column 3 out of range for row with 2 fields");
        assert_eq!(
            Error::InvalidConfig("fanout must be at least 2".into()).to_string(),
            "invalid configuration: fanout must be at least 2"
        );
    }
}
