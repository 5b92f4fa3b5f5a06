use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Misuse of a [`LineCursor`](crate::utils::lines::LineCursor).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    #[error("no more lines")]
    EndOfInput,
    #[error("rewind called twice without an intervening next")]
    DoubleRewind,
}

#[derive(Debug, Error)]
pub enum BugreportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("line cursor misuse: {0}")]
    Cursor(#[from] CursorError),

    #[error("no log file found in {0}")]
    NoLogFile(PathBuf),

    #[error("unsupported input: {0}")]
    Unsupported(PathBuf),
}

pub type Result<T> = std::result::Result<T, BugreportError>;
