//! Admission gates
//!
//! Three counting semaphores bound the work in flight (files, queued jobs,
//! worker streams), plus one single-permit gate serializing the phase in
//! which a file collects its stream permits. Without that serializer two
//! files could each hold part of the stream budget while waiting for the
//! rest, and neither would ever release. Copy work itself runs in parallel:
//! the serializer is dropped as soon as a file holds its full complement.
//!
//! Acquisition order per file: file permit, serializer, stream permits,
//! drop serializer, copy, drop stream permits and file permit.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::errors::CopyError;
use crate::options::Options;

#[derive(Debug)]
pub struct AdmissionGates {
    files: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    streams: Arc<Semaphore>,
    stream_acquire: tokio::sync::Mutex<()>,
}

impl AdmissionGates {
    #[must_use]
    pub fn new(options: &Options) -> Self {
        Self {
            files: Arc::new(Semaphore::new(options.max_concurrent_files)),
            queue: Arc::new(Semaphore::new(options.max_file_queue_length)),
            streams: Arc::new(Semaphore::new(options.max_total_threads)),
            stream_acquire: tokio::sync::Mutex::new(()),
        }
    }

    /// Held for the lifetime of one file copy.
    pub async fn admit_file(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, CopyError> {
        tokio::select! {
            permit = self.files.clone().acquire_owned() => Ok(permit.unwrap()),
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
        }
    }

    /// Acquired by the walker before dispatching a job; the permit travels
    /// with the job and is dropped when its file copy terminates, so the
    /// walker cannot outrun the copier.
    pub async fn reserve_queue_slot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, CopyError> {
        tokio::select! {
            permit = self.queue.clone().acquire_owned() => Ok(permit.unwrap()),
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
        }
    }

    /// Enter the stream-acquisition phase. At most one file holds the
    /// returned guard at any moment; it must stay alive until that file's
    /// `acquire_streams` call returns.
    pub async fn begin_stream_acquisition(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>, CopyError> {
        tokio::select! {
            guard = self.stream_acquire.lock() => Ok(guard),
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
        }
    }

    /// Collect `count` stream permits for one file. Callers hold the guard
    /// from `begin_stream_acquisition` across this call.
    pub async fn acquire_streams(
        &self,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, CopyError> {
        tokio::select! {
            permits = self.streams.clone().acquire_many_owned(count) => Ok(permits.unwrap()),
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
        }
    }
}
