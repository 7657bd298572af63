use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-scoped transfer counters. Reset at the start of each operation,
/// bumped atomically by the walker, the file copier and the chunk workers,
/// and sampled by progress displays while an operation runs.
#[derive(Debug, Default)]
pub struct Progress {
    files_started: AtomicU64,
    files_copied: AtomicU64,
    files_skipped: AtomicU64,
    directories_created: AtomicU64,
    bytes_copied: AtomicU64,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct Snapshot {
    pub files_started: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub directories_created: u64,
    pub bytes_copied: u64,
}

impl Progress {
    pub fn reset(&self) {
        self.files_started.store(0, Ordering::Relaxed);
        self.files_copied.store(0, Ordering::Relaxed);
        self.files_skipped.store(0, Ordering::Relaxed);
        self.directories_created.store(0, Ordering::Relaxed);
        self.bytes_copied.store(0, Ordering::Relaxed);
    }

    pub fn file_started(&self) {
        self.files_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_copied(&self) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn directory_created(&self) {
        self.directories_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, count: u64) {
        self.bytes_copied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get(&self) -> Snapshot {
        Snapshot {
            files_started: self.files_started.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            directories_created: self.directories_created.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self, elapsed: std::time::Duration) -> Summary {
        let snapshot = self.get();
        Summary {
            files_copied: snapshot.files_copied,
            files_skipped: snapshot.files_skipped,
            directories_created: snapshot.directories_created,
            bytes_copied: snapshot.bytes_copied,
            elapsed,
        }
    }
}

/// Final statistics of one copy operation.
#[derive(Debug, Copy, Clone, Default)]
pub struct Summary {
    pub files_copied: u64,
    pub files_skipped: u64,
    pub directories_created: u64,
    pub bytes_copied: u64,
    pub elapsed: std::time::Duration,
}

impl Summary {
    /// Bytes per second over the operation, zero for an instantaneous run.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.bytes_copied as f64 / seconds
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_copied: self.files_copied + other.files_copied,
            files_skipped: self.files_skipped + other.files_skipped,
            directories_created: self.directories_created + other.directories_created,
            bytes_copied: self.bytes_copied + other.bytes_copied,
            elapsed: self.elapsed + other.elapsed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files copied: {}\nfiles skipped: {}\ndirectories created: {}\nbytes copied: {}\nelapsed: {:.2}s ({}/s)",
            self.files_copied,
            self.files_skipped,
            self.directories_created,
            bytesize::ByteSize(self.bytes_copied),
            self.elapsed.as_secs_f64(),
            bytesize::ByteSize(self.throughput() as u64),
        )
    }
}
