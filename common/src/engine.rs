use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::copier::{self, CopyJob};
use crate::errors::{CopyError, ErrorBag};
use crate::events::{self, EventSink, NullSink};
use crate::gates::AdmissionGates;
use crate::options::Options;
use crate::progress::{Progress, Summary};
use crate::walker;

/// State shared between the engine, the walker and every dispatched copy
/// task for the duration of one operation.
pub(crate) struct Shared {
    pub options: Options,
    pub gates: AdmissionGates,
    pub progress: Arc<Progress>,
    pub bag: ErrorBag,
    pub sink: Box<dyn EventSink>,
}

impl Shared {
    pub(crate) fn emit(&self, level: i32, message: impl Fn() -> String) {
        self.sink.emit(level, &message);
    }
}

/// The copy engine. Owns the admission gates, the progress counters and
/// the error bag; an engine instance runs one operation at a time.
pub struct CopyEngine {
    shared: Arc<Shared>,
    operation: tokio::sync::Mutex<()>,
}

impl CopyEngine {
    pub fn new(options: Options) -> Result<Self, CopyError> {
        Self::with_sink(options, Box::new(NullSink))
    }

    pub fn with_sink(options: Options, sink: Box<dyn EventSink>) -> Result<Self, CopyError> {
        let options = options.validated()?;
        let gates = AdmissionGates::new(&options);
        Ok(Self {
            shared: Arc::new(Shared {
                options,
                gates,
                progress: Arc::new(Progress::default()),
                bag: ErrorBag::default(),
                sink,
            }),
            operation: tokio::sync::Mutex::new(()),
        })
    }

    /// Live counters, for progress displays sampling a running operation.
    #[must_use]
    pub fn progress(&self) -> Arc<Progress> {
        self.shared.progress.clone()
    }

    /// Copy a file or a directory tree from `src` to `dst`.
    ///
    /// A trailing separator declares a path to be a directory; a source
    /// that does not exist and does not end with a separator is taken as
    /// `<directory>/<filename mask>`. Returns once every dispatched file
    /// copy has terminated or cancellation was observed.
    #[instrument(skip(self), level = "debug")]
    pub async fn copy(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<Summary, CopyError> {
        let _operation = self.operation.lock().await;
        self.shared.progress.reset();
        self.shared.bag.clear();
        let started = std::time::Instant::now();
        let mut dispatched = tokio::task::JoinSet::new();
        let walk_result = walker::walk(&self.shared, src, dst, cancel, &mut dispatched).await;
        while let Some(joined) = dispatched.join_next().await {
            if let Err(join_error) = joined {
                self.shared.bag.push(CopyError::IoWrite {
                    path: dst.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, join_error),
                });
            }
        }
        self.finish(started, walk_result, cancel)
    }

    /// Copy a single file without walking. The destination is used as
    /// given; budgets apply the same as during a tree copy.
    #[instrument(skip(self), level = "debug")]
    pub async fn copy_file(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<Summary, CopyError> {
        let _operation = self.operation.lock().await;
        self.shared.progress.reset();
        self.shared.bag.clear();
        let started = std::time::Instant::now();
        let job = CopyJob {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        };
        let result = match copier::copy_one(&self.shared, &job, cancel).await {
            Ok(()) | Err(CopyError::Cancelled) => Ok(()),
            Err(error) => {
                let error = CopyError::in_file_copy(&job.src, &job.dst, error);
                tracing::error!("{}", &error);
                self.shared.bag.push(error);
                Ok(())
            }
        };
        self.finish(started, result, cancel)
    }

    /// Close out an operation: emit the statistics event and raise
    /// whatever the bag collected. Cancellation wins only when no real
    /// failure was recorded; it is reported to the caller, never bagged.
    fn finish(
        &self,
        started: std::time::Instant,
        walk_result: Result<(), CopyError>,
        cancel: &CancellationToken,
    ) -> Result<Summary, CopyError> {
        if let Err(error) = walk_result {
            if !matches!(error, CopyError::Cancelled) {
                tracing::error!("{}", &error);
                self.shared.bag.push(error);
            }
        }
        let summary = self.shared.progress.summary(started.elapsed());
        self.shared.emit(events::LEVEL_STATS, || {
            format!(
                "copied {} files ({} bytes) in {:.2}s, {} skipped",
                summary.files_copied,
                summary.bytes_copied,
                summary.elapsed.as_secs_f64(),
                summary.files_skipped
            )
        });
        let errors = self.shared.bag.drain();
        if !errors.is_empty() {
            return Err(CopyError::from_bag(errors));
        }
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        Ok(summary)
    }
}
