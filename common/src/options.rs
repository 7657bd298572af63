//! Engine configuration

use crate::errors::CopyError;

/// Knobs controlling the copy engine. Validated once at engine construction
/// and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Options {
    /// Cap on files being copied simultaneously
    pub max_concurrent_files: usize,
    /// Cap on read/write streams per file; clamped to `max_total_threads` during validation
    pub max_threads_per_file: usize,
    /// Cap on read/write streams across all files
    pub max_total_threads: usize,
    /// Bytes per chunk and per read/write buffer
    pub buffer_size: usize,
    /// Backpressure bound on jobs queued ahead of the copier
    pub max_file_queue_length: usize,
    /// Stage to a `.incomplete` sibling and rename into place on completion
    pub use_incomplete_filename: bool,
    /// Materialize empty source directories at the destination
    pub copy_empty_directories: bool,
    /// Absolute prefix rewritten to `<prefix>_<n>` for streams beyond the first,
    /// so single-connection-per-path network mounts parallelize
    pub incremental_source_path: Option<std::path::PathBuf>,
    /// A file gets an extra stream only per this many chunks of length
    pub min_chunks_per_thread: u64,
    /// Skip files whose destination matches the source by length and mtime
    pub skip_existing_identical: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent_files: 4,
            max_threads_per_file: 4,
            max_total_threads: 4,
            buffer_size: 128 * 1024,
            max_file_queue_length: 50,
            use_incomplete_filename: true,
            copy_empty_directories: false,
            incremental_source_path: None,
            min_chunks_per_thread: 32,
            skip_existing_identical: false,
        }
    }
}

impl Options {
    /// Check every field and clamp `max_threads_per_file`. Consumed by
    /// `CopyEngine::new`; invalid values surface as `InvalidArgument`.
    pub fn validated(mut self) -> Result<Self, CopyError> {
        if self.max_concurrent_files == 0 {
            return Err(CopyError::InvalidArgument(
                "max_concurrent_files must be at least 1".to_string(),
            ));
        }
        if self.max_threads_per_file == 0 {
            return Err(CopyError::InvalidArgument(
                "max_threads_per_file must be at least 1".to_string(),
            ));
        }
        if self.max_total_threads == 0 {
            return Err(CopyError::InvalidArgument(
                "max_total_threads must be at least 1".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(CopyError::InvalidArgument(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.max_file_queue_length == 0 {
            return Err(CopyError::InvalidArgument(
                "max_file_queue_length must be at least 1".to_string(),
            ));
        }
        if self.min_chunks_per_thread == 0 {
            return Err(CopyError::InvalidArgument(
                "min_chunks_per_thread must be at least 1".to_string(),
            ));
        }
        if let Some(prefix) = &self.incremental_source_path {
            if !prefix.is_absolute() {
                return Err(CopyError::InvalidArgument(format!(
                    "incremental_source_path must be absolute, got {:?}",
                    prefix
                )));
            }
        }
        self.max_threads_per_file = std::cmp::min(self.max_threads_per_file, self.max_total_threads);
        Ok(self)
    }

    /// Number of streams elected for a file of the given length. A file gets
    /// one stream per `buffer_size * min_chunks_per_thread` bytes, at least
    /// one and at most `max_threads_per_file`, so tiny files stay sequential.
    pub fn worker_count(&self, source_len: u64) -> usize {
        let min_bytes_per_worker = self.buffer_size as u64 * self.min_chunks_per_thread;
        let by_length = std::cmp::max(1, source_len / min_bytes_per_worker) as usize;
        std::cmp::min(self.max_threads_per_file, by_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = Options::default().validated().unwrap();
        assert_eq!(options.max_concurrent_files, 4);
        assert_eq!(options.buffer_size, 131072);
        assert!(options.use_incomplete_filename);
    }

    #[test]
    fn zero_values_are_rejected() {
        let cases: [fn(&mut Options); 6] = [
            |o| o.max_concurrent_files = 0,
            |o| o.max_threads_per_file = 0,
            |o| o.max_total_threads = 0,
            |o| o.buffer_size = 0,
            |o| o.max_file_queue_length = 0,
            |o| o.min_chunks_per_thread = 0,
        ];
        for build in cases {
            let mut options = Options::default();
            build(&mut options);
            assert!(matches!(
                options.validated(),
                Err(CopyError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn relative_incremental_prefix_is_rejected() {
        let options = Options {
            incremental_source_path: Some(std::path::PathBuf::from("mnt/sshfs")),
            ..Default::default()
        };
        assert!(matches!(
            options.validated(),
            Err(CopyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn threads_per_file_clamped_to_total() {
        let options = Options {
            max_threads_per_file: 16,
            max_total_threads: 4,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(options.max_threads_per_file, 4);
    }

    #[test]
    fn worker_count_election() {
        let options = Options::default().validated().unwrap();
        // 1 KB is far below one full allotment of chunks
        assert_eq!(options.worker_count(1024), 1);
        // 100 MiB / (128 KiB * 32) = 25, capped by max_threads_per_file
        assert_eq!(options.worker_count(100 * 1024 * 1024), 4);
        // empty file still gets one stream
        assert_eq!(options.worker_count(0), 1);
        // exactly one allotment
        assert_eq!(options.worker_count(131072 * 32), 1);
        // two allotments
        assert_eq!(options.worker_count(131072 * 64), 2);
    }
}
