use std::fmt::{Debug, Formatter};
use std::io;
use std::path::PathBuf;

/// Coarse-grained taxonomy from the error handling design: used by callers (the façade layer)
/// to decide whether an error is retryable, a security violation, or a plain validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Param,
    File,
    Io,
    BinaryFile,
    Transaction,
    Schema,
}

pub enum NtsError {
    // PARAM_*
    MissingParameter(&'static str),
    InvalidValue(&'static str, String),
    OutOfRange(&'static str, String),
    LineExceedsFile(usize, usize),
    ConflictingParameters(&'static str, &'static str),
    SymbolNotFound(String),
    PatternNotFound(String),

    // FILE_*
    FileNotFound(PathBuf),
    FileTooLarge(PathBuf, usize),
    DirectoryNotFound(PathBuf),
    DirectoryNotEmpty(PathBuf),
    PathEscapesWorkingDirectory(PathBuf),

    // IO_*
    IoAccessDenied(PathBuf, io::Error),
    IoFileLocked(PathBuf),
    IoRetriesExhausted(PathBuf, io::Error),
    Io(io::Error),

    // BINARY_FILE
    BinaryFileRejected(PathBuf),

    // TRANSACTION_*
    NoActiveTransaction,
    CheckpointNotFound(String),

    // SCHEMA_*
    SchemaUnknownVersion(i64),
    SchemaIncompatible { found: i64, expected: i64 },

    // Journal store / task plumbing. `nts-storage` owns the rusqlite dependency and converts
    // its own errors into this variant at the crate boundary, keeping `nts-shared` dependency-free.
    Store(String),
    TaskNotFound(String),
}

impl NtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NtsError::MissingParameter(_)
            | NtsError::InvalidValue(_, _)
            | NtsError::OutOfRange(_, _)
            | NtsError::LineExceedsFile(_, _)
            | NtsError::ConflictingParameters(_, _)
            | NtsError::SymbolNotFound(_)
            | NtsError::PatternNotFound(_) => ErrorKind::Param,

            NtsError::FileNotFound(_)
            | NtsError::FileTooLarge(_, _)
            | NtsError::DirectoryNotFound(_)
            | NtsError::DirectoryNotEmpty(_)
            | NtsError::PathEscapesWorkingDirectory(_) => ErrorKind::File,

            NtsError::IoAccessDenied(_, _)
            | NtsError::IoFileLocked(_)
            | NtsError::IoRetriesExhausted(_, _)
            | NtsError::Io(_) => ErrorKind::Io,

            NtsError::BinaryFileRejected(_) => ErrorKind::BinaryFile,

            NtsError::NoActiveTransaction | NtsError::CheckpointNotFound(_) => ErrorKind::Transaction,

            NtsError::SchemaUnknownVersion(_) | NtsError::SchemaIncompatible { .. } => ErrorKind::Schema,

            NtsError::Store(_) | NtsError::TaskNotFound(_) => ErrorKind::Io,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io)
    }
}

impl Debug for NtsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NtsError::MissingParameter(name) => write!(f, "Missing required parameter: {}", name),
            NtsError::InvalidValue(name, value) => write!(f, "Invalid value for parameter {}: {}", name, value),
            NtsError::OutOfRange(name, detail) => write!(f, "Parameter {} out of range: {}", name, detail),
            NtsError::LineExceedsFile(requested, total) => {
                write!(f, "Requested line {} exceeds file with {} lines", requested, total)
            }
            NtsError::ConflictingParameters(a, b) => write!(f, "Conflicting parameters: {} and {}", a, b),
            NtsError::SymbolNotFound(name) => write!(f, "Symbol not found: {}", name),
            NtsError::PatternNotFound(pattern) => write!(f, "Pattern not found: {}", pattern),

            NtsError::FileNotFound(path) => write!(f, "File not found: {}", path.display()),
            NtsError::FileTooLarge(path, size) => write!(f, "File too large: {} ({} bytes)", path.display(), size),
            NtsError::DirectoryNotFound(path) => write!(f, "Directory not found: {}", path.display()),
            NtsError::DirectoryNotEmpty(path) => write!(f, "Directory not empty: {}", path.display()),
            NtsError::PathEscapesWorkingDirectory(path) => {
                write!(f, "Path escapes the task's working directory: {}", path.display())
            }

            NtsError::IoAccessDenied(path, e) => write!(f, "Access denied on {}: {}", path.display(), e),
            NtsError::IoFileLocked(path) => write!(f, "{} is locked by another process", path.display()),
            NtsError::IoRetriesExhausted(path, e) => {
                write!(f, "Retries exhausted operating on {}: {}", path.display(), e)
            }
            NtsError::Io(e) => write!(f, "I/O error: {}", e),

            NtsError::BinaryFileRejected(path) => write!(f, "Refusing to read binary file: {}", path.display()),

            NtsError::NoActiveTransaction => write!(f, "No active transaction"),
            NtsError::CheckpointNotFound(name) => write!(f, "Checkpoint not found: {}", name),

            NtsError::SchemaUnknownVersion(version) => write!(f, "Unknown journal schema version: {}", version),
            NtsError::SchemaIncompatible { found, expected } => {
                write!(f, "Incompatible journal schema version: found {}, expected {}", found, expected)
            }

            NtsError::Store(e) => write!(f, "Journal store error: {}", e),
            NtsError::TaskNotFound(id) => write!(f, "Task not found: {}", id),
        }
    }
}

impl From<io::Error> for NtsError {
    fn from(value: io::Error) -> Self {
        NtsError::Io(value)
    }
}

impl std::fmt::Display for NtsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for NtsError {}
