use std::path::PathBuf;

/// Failure taxonomy for copy operations.
///
/// Per-file failures are wrapped with their source/destination context
/// (`FileCopy`) before landing in the engine's error bag; the bag is raised
/// as the single contained error or as `Aggregate` when several files
/// failed. `Cancelled` is reported to the caller directly and never bagged.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{path:?} does not exist")]
    NotFound { path: PathBuf },

    #[error("failed reading {path:?}: {source}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed writing {path:?}: {source}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed renaming {from:?} to {to:?}: {source}")]
    IoRename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed deleting {path:?}: {source}")]
    IoDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed setting {what} on {path:?}: {source}")]
    IoMetadata {
        path: PathBuf,
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("copying {src:?} to {dst:?} failed: {source}")]
    FileCopy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: Box<CopyError>,
    },

    #[error("{} file copies failed", .errors.len())]
    Aggregate { errors: Vec<CopyError> },
}

impl CopyError {
    /// Wrap a per-file failure with the job it belongs to.
    #[must_use]
    pub fn in_file_copy(src: &std::path::Path, dst: &std::path::Path, source: CopyError) -> Self {
        CopyError::FileCopy {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            source: Box::new(source),
        }
    }

    /// Collapse a non-empty error collection: a lone error is raised as
    /// itself, anything more becomes an aggregate.
    #[must_use]
    pub fn from_bag(mut errors: Vec<CopyError>) -> Self {
        assert!(!errors.is_empty());
        if errors.len() == 1 {
            errors.pop().unwrap()
        } else {
            CopyError::Aggregate { errors }
        }
    }
}

/// Engine-scoped failure collection. Insertion is concurrency-safe; the
/// engine drains it only after every dispatched task has been joined.
#[derive(Debug, Default)]
pub struct ErrorBag {
    errors: std::sync::Mutex<Vec<CopyError>>,
}

impl ErrorBag {
    pub fn push(&self, error: CopyError) {
        self.errors.lock().unwrap().push(error);
    }

    /// Scopes check this on entry and short-circuit when a failure is
    /// already recorded, so one bad file winds the operation down without
    /// aborting copies mid-chunk.
    pub fn is_empty(&self) -> bool {
        self.errors.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.errors.lock().unwrap().clear();
    }

    pub fn drain(&self) -> Vec<CopyError> {
        std::mem::take(&mut *self.errors.lock().unwrap())
    }
}
