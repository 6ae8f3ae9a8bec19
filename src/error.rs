use std::path::PathBuf;

/// Errors raised by the store, the bin index and the consolidation engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wrong field count or unparseable field; the whole batch is rejected.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Chain/strand mismatch or index out of sync with its base rows.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("I/O error: {source} ({path})")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Convenience for wrapping an `io::Error` with a path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            source: err,
            path: PathBuf::from("<unknown>"),
        }
    }
}
