use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Engine-level failures: anything that prevents a run from proceeding at
/// all. Per-unit stage failures never surface here; they are folded into
/// the unit's terminal status by the unit pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no units to process")]
    NoUnits,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

/// Outcome classification for one external command invocation.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("command exited with code {0}")]
    NonZeroExit(i32),

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("unexpected execution failure: {0}")]
    Unexpected(String),
}

/// Derived-artifact extraction failures are I/O only; the transform itself
/// is total.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display() {
        assert_eq!(
            ExecutionError::NonZeroExit(2).to_string(),
            "command exited with code 2"
        );
        assert_eq!(
            ExecutionError::Timeout(3600).to_string(),
            "command timed out after 3600s"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
