//! Engine for `spcp` - striped parallel copy.
//!
//! Copies a file or a directory tree using multiple files in flight and
//! multiple positioned read/write streams per file. Sequential copying
//! cannot saturate a high-latency, high-bandwidth link (an SSHFS mount
//! being the canonical case); striping chunks across concurrent streams
//! can.
//!
//! Three admission budgets intersect: files in flight, streams per file
//! and streams across all files, with a bounded job queue applying
//! backpressure to tree discovery. Data is staged to a `.incomplete`
//! sibling and renamed into place once every chunk has been written, so a
//! destination path never holds a partial file.
//!
//! ```no_run
//! # async fn example() -> Result<(), common::CopyError> {
//! let engine = common::CopyEngine::new(common::Options::default())?;
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let summary = engine
//!     .copy(
//!         std::path::Path::new("/mnt/remote/data"),
//!         std::path::Path::new("/srv/data"),
//!         &cancel,
//!     )
//!     .await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod copier;
pub mod engine;
pub mod errors;
pub mod events;
pub mod gates;
pub mod meta;
pub mod options;
pub mod progress;
pub mod walker;

mod testutils;

pub use copier::CopyJob;
pub use engine::CopyEngine;
pub use errors::CopyError;
pub use events::{EventSink, NullSink, StderrSink};
pub use options::Options;
pub use progress::{Progress, Summary};

use tokio_util::sync::CancellationToken;

/// Process-level knobs the binary hands to [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Suppress error output
    pub quiet: bool,
    /// 0=ERROR, 1=INFO, 2=DEBUG, 3+=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub summary: bool,
    /// Show a progress bar while the operation runs
    pub progress: bool,
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default)
    pub max_blocking_threads: usize,
}

/// Set up tracing and the tokio runtime, wire Ctrl-C to a cancellation
/// token, run `func` and report its outcome. Returns `None` on failure or
/// cancellation; the caller maps that to a nonzero exit.
pub fn run<F, Fut>(
    settings: &RunSettings,
    progress: std::sync::Arc<Progress>,
    func: F,
) -> Option<Summary>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<Summary, CopyError>>,
{
    let filter = if settings.quiet {
        "off"
    } else {
        match settings.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if settings.max_workers > 0 {
        builder.worker_threads(settings.max_workers);
    }
    if settings.max_blocking_threads > 0 {
        builder.max_blocking_threads(settings.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start the async runtime: {error}");
            return None;
        }
    };
    let result = runtime.block_on(async {
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, winding down");
                    cancel.cancel();
                }
            });
        }
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let pbar_thread = {
            let done = done.clone();
            let progress = progress.clone();
            let show_progress = settings.progress;
            std::thread::spawn(move || {
                if !show_progress {
                    return;
                }
                let pbar = indicatif::ProgressBar::new(0);
                loop {
                    if done.load(std::sync::atomic::Ordering::SeqCst) {
                        break;
                    }
                    let snapshot = progress.get();
                    pbar.set_length(snapshot.files_started);
                    pbar.set_position(snapshot.files_copied + snapshot.files_skipped);
                    std::thread::sleep(std::time::Duration::from_millis(200));
                }
                pbar.finish_and_clear();
            })
        };
        let result = func(cancel.clone()).await;
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        pbar_thread.join().unwrap();
        result
    });
    match result {
        Ok(summary) => {
            if settings.summary {
                println!("{}", &summary);
            }
            Some(summary)
        }
        Err(error) => {
            match &error {
                CopyError::Cancelled => tracing::warn!("copy cancelled"),
                CopyError::Aggregate { errors } => {
                    tracing::error!("{} file copies failed", errors.len())
                }
                other => tracing::error!("{}", other),
            }
            None
        }
    }
}
