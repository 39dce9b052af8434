//! Error types and `Result` alias for the storage engine.
//!
//! Mirrors the closed result-code taxonomy a buffer-pool-backed physical
//! file layer reports up through the B+-tree engine: every public operation
//! in `physical` and `btree` returns [`Result<T>`].

use std::fmt;

/// Closed set of result codes the engine can report.
///
/// The B+-tree-visible subset (`BadArgument` .. `FileManipulateError`) comes
/// directly from the error-handling design; `Corrupt`/`Io`/`Full`/`Internal`
/// are the lower-level counterparts the physical file layer raises before
/// they are classified into the higher-level kind by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Request violates a documented precondition.
    BadArgument = 1,
    /// An area could not be allocated even after compaction.
    OutOfSpace,
    /// Insert would duplicate an existing non-tombstoned key on a unique index.
    UniquenessViolation,
    /// NULL supplied for a non-nullable field (Simple variant only).
    NullabilityViolation,
    /// `verify()` found a structural inconsistency.
    IntegrityViolation,
    /// `verify()` found an inconsistency it cannot repair.
    VerifyInconsistent,
    /// `verify()` found and repaired an inconsistency.
    VerifyCorrected,
    /// Operation aborted cooperatively via a cancellation flag.
    Cancel,
    /// Internal invariant violated; callers should treat as fatal.
    Unexpected,
    /// Wrapping failure for a lower-layer (buffer pool / file system) error.
    FileManipulateError,
    /// On-disk structure failed a low-level sanity check.
    Corrupt,
    /// Underlying file-system I/O error.
    Io,
    /// Page or file is full; lower-level counterpart of `OutOfSpace`.
    Full,
    /// Internal invariant violated below the B+-tree layer.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadArgument => "BadArgument",
            ErrorCode::OutOfSpace => "OutOfSpace",
            ErrorCode::UniquenessViolation => "UniquenessViolation",
            ErrorCode::NullabilityViolation => "NullabilityViolation",
            ErrorCode::IntegrityViolation => "IntegrityViolation",
            ErrorCode::VerifyInconsistent => "VerifyInconsistent",
            ErrorCode::VerifyCorrected => "VerifyCorrected",
            ErrorCode::Cancel => "Cancel",
            ErrorCode::Unexpected => "Unexpected",
            ErrorCode::FileManipulateError => "FileManipulateError",
            ErrorCode::Corrupt => "Corrupt",
            ErrorCode::Io => "Io",
            ErrorCode::Full => "Full",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine error: a code plus a free-form diagnostic message.
#[derive(Debug, Clone)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.as_str().to_string(),
            code,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::with_message(ErrorCode::Io, e.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
