use std::fmt;
use std::path::PathBuf;

use crate::hash::Algorithm;

/// error type for auditcp operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no digest algorithm is declared by every input manifest")]
    NoCommonAlgorithm,

    #[error("malformed manifest {path} line {line}: {message}")]
    ManifestParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("manifest {path} does not record {algorithm} digests")]
    MissingAlgorithm { path: PathBuf, algorithm: Algorithm },

    #[error("cannot prepare destination {path}: {message}")]
    Destination { path: PathBuf, message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("digest mismatch at {path}: {message}")]
    Verification { path: PathBuf, message: String },

    #[error("cannot set ownership {uid}:{gid} on {path}: {source}")]
    Ownership {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file type at {0}")]
    Unsupported(PathBuf),

    #[error("invalid digest hex: {0}")]
    InvalidDigestHex(String),

    #[error("cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// coarse classification of errors, deciding whether a run can continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    IndexBuild,
    Io,
    Verification,
    Ownership,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::IndexBuild => "index build error",
            ErrorKind::Io => "io error",
            ErrorKind::Verification => "verification error",
            ErrorKind::Ownership => "ownership error",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::NoCommonAlgorithm
            | Error::Destination { .. }
            | Error::WorkerPool(_) => ErrorKind::Config,
            Error::ManifestParse { .. } | Error::MissingAlgorithm { .. } => ErrorKind::IndexBuild,
            Error::Io { .. } | Error::Unsupported(_) | Error::InvalidDigestHex(_) => ErrorKind::Io,
            Error::Verification { .. } => ErrorKind::Verification,
            Error::Ownership { .. } => ErrorKind::Ownership,
        }
    }

    /// fatal errors abort the run before any entry is processed
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::IndexBuild)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
