//! Chunked transfer workers
//!
//! Each file copy shares one cursor among its workers; a worker claims the
//! next chunk index, reads that region from its own source handle and
//! writes it to the staging file at the same offset. The cursor guarantees
//! exactly-once chunk assignment however the scheduler interleaves the
//! workers, and per-worker handles keep the incremental-source-path rewrite
//! working uniformly (each handle may point at a different mount entry).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::errors::CopyError;
use crate::progress::Progress;

/// Atomic chunk counter shared by all workers of one file. Starts at -1 so
/// the first claim yields index 0.
#[derive(Debug)]
pub struct ChunkCursor(AtomicI64);

impl ChunkCursor {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicI64::new(-1))
    }

    pub fn next(&self) -> u64 {
        (self.0.fetch_add(1, Ordering::SeqCst) + 1) as u64
    }
}

impl Default for ChunkCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes staging-file extension. Concurrent `set_len` calls from
/// different workers do not compose with later positioned writes, so growth
/// happens under this gate.
pub type ResizeGate = tokio::sync::Mutex<()>;

/// For stream index `t > 0`, a source path under the configured prefix is
/// rewritten to `<prefix>_<t+1><suffix>`. The caller exposes those sibling
/// paths (e.g. via symlinks) so a single-connection-per-path network mount
/// opens an independent connection per stream. Stream 0 always reads the
/// unmodified path. The prefix comparison is case-insensitive.
#[must_use]
pub fn source_for_worker(
    source: &std::path::Path,
    worker_index: usize,
    incremental_prefix: Option<&std::path::Path>,
) -> std::path::PathBuf {
    if worker_index == 0 {
        return source.to_path_buf();
    }
    let Some(prefix) = incremental_prefix else {
        return source.to_path_buf();
    };
    let source_str = source.to_string_lossy();
    let prefix_str = prefix.to_string_lossy();
    match source_str.get(..prefix_str.len()) {
        Some(head) if head.eq_ignore_ascii_case(&prefix_str) => {
            let suffix = &source_str[prefix_str.len()..];
            std::path::PathBuf::from(format!("{}_{}{}", head, worker_index + 1, suffix))
        }
        _ => source.to_path_buf(),
    }
}

pub(crate) struct WorkerContext {
    pub source: std::path::PathBuf,
    pub staging: std::path::PathBuf,
    pub buffer_size: usize,
    pub cursor: Arc<ChunkCursor>,
    pub resize_gate: Arc<ResizeGate>,
    pub progress: Arc<Progress>,
    pub cancel: CancellationToken,
}

/// One worker: claim chunk indices until the source is exhausted. The
/// source length is re-read through this worker's own handle every
/// iteration; running past it is the natural termination signal.
pub(crate) async fn run_worker(ctx: WorkerContext) -> Result<(), CopyError> {
    let read_error = |source: std::io::Error| CopyError::IoRead {
        path: ctx.source.clone(),
        source,
    };
    let write_error = |source: std::io::Error| CopyError::IoWrite {
        path: ctx.staging.clone(),
        source,
    };
    let mut source = tokio::fs::OpenOptions::new()
        .read(true)
        .open(&ctx.source)
        .await
        .map_err(read_error)?;
    let mut staging = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&ctx.staging)
        .await
        .map_err(write_error)?;
    let mut buffer = vec![0u8; ctx.buffer_size];
    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let index = ctx.cursor.next();
        let start = index * ctx.buffer_size as u64;
        let source_len = source.metadata().await.map_err(read_error)?.len();
        if start >= source_len {
            break;
        }
        let effective = std::cmp::min(ctx.buffer_size as u64, source_len - start) as usize;
        {
            let _resize = ctx.resize_gate.lock().await;
            let staging_len = staging.metadata().await.map_err(write_error)?.len();
            if staging_len < start + effective as u64 {
                staging
                    .set_len(start + effective as u64)
                    .await
                    .map_err(write_error)?;
            }
        }
        source
            .seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(read_error)?;
        // fill the whole chunk region; a short positioned read would leave
        // a zero gap behind the pre-extended staging length
        let mut filled = 0usize;
        while filled < effective {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let count = source
                .read(&mut buffer[filled..effective])
                .await
                .map_err(read_error)?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        if filled == 0 {
            break;
        }
        staging
            .seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(write_error)?;
        staging.write_all(&buffer[..filled]).await.map_err(write_error)?;
        ctx.progress.add_bytes(filled as u64);
        tracing::trace!(
            "chunk {} of {:?}: {} bytes at offset {}",
            index,
            &ctx.staging,
            filled,
            start
        );
    }
    staging.flush().await.map_err(write_error)?;
    Ok(())
}
