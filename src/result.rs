//! Error types and the related `Result<T>`

use std::path::PathBuf;

use thiserror::Error;

pub type GzResult<T> = Result<T, GzError>;

#[derive(Debug, Error)]
pub enum GzError {
    /// An error from underlying I/O
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A buffer couldn't grow any further.
    #[error("Out of memory")]
    Allocation,

    /// The input ended before a member header was complete.
    #[error("unexpected end of file")]
    TruncatedHeader,

    /// The member header contained invalid data per RFC 1952.
    #[error("{0}")]
    MalformedHeader(String),

    /// The compressed payload (or its trailer) was invalid or cut short.
    #[error("{0}")]
    CorruptStream(String),

    /// The input didn't contain a single byte of compressed data.
    #[error("unexpected end of file")]
    EmptyOrTruncatedInput,

    /// Couldn't derive a decompressed name from the file's suffix.
    #[error("unknown suffix -- ignored")]
    UnrecognizedSuffix(PathBuf),

    /// The target is a symbolic link and we weren't told to follow it.
    #[error("is a link; not processing")]
    SymlinkRejected(PathBuf),

    /// The target is a directory and we weren't told to recurse.
    #[error("is a directory -- ignored")]
    DirectoryWithoutRecursion(PathBuf),

    /// A path (from the user or a stored name) couldn't be used.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Refused to read or write compressed data on a terminal.
    #[error("compressed data not {0} a terminal. Use -f to force.")]
    Terminal(&'static str),
}

impl GzError {
    /// The class of exit status this error folds into.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            GzError::UnrecognizedSuffix(_)
            | GzError::DirectoryWithoutRecursion(_)
            | GzError::InvalidPath(_) => ExitStatus::Warning,
            _ => ExitStatus::Error,
        }
    }
}

/// Outcome of a target (or a whole run), ordered from best to worst.
///
/// A run's status is the maximum over all of its targets.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExitStatus {
    #[default]
    Success,
    Error,
    Warning,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Error => 1,
            ExitStatus::Warning => 2,
        }
    }

    /// Folds another outcome into this one, keeping the worst.
    pub fn fold(&mut self, other: ExitStatus) {
        *self = (*self).max(other);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn worst_status_wins() {
        let mut status = ExitStatus::Success;
        status.fold(ExitStatus::Warning);
        status.fold(ExitStatus::Error);
        assert_eq!(status, ExitStatus::Warning);
        assert_eq!(status.code(), 2);
    }

    #[test]
    fn classification() {
        let suffix = GzError::UnrecognizedSuffix("foo.bin".into());
        assert_eq!(suffix.exit_status(), ExitStatus::Warning);
        assert_eq!(suffix.to_string(), "unknown suffix -- ignored");
        assert_eq!(
            GzError::CorruptStream("invalid block type".into()).exit_status(),
            ExitStatus::Error
        );
        assert_eq!(
            GzError::SymlinkRejected("link".into()).exit_status(),
            ExitStatus::Error
        );
    }
}
