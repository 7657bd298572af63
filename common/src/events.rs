//! Verbose-event reporting
//!
//! The engine reports progress through a single observer. Each event carries
//! a verbosity level; sinks display messages whose level is at or below the
//! level they were configured to show. Message strings are built lazily so
//! filtered-out events cost nothing.

/// Per-operation statistics lines
pub const LEVEL_STATS: i32 = 1;
/// Per-file lifecycle lines (start, end, skip)
pub const LEVEL_FILE: i32 = 2;

pub trait EventSink: Send + Sync {
    fn emit(&self, level: i32, message: &dyn Fn() -> String);
}

/// Discards everything. Default sink for library users that only care about
/// the returned summary.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _level: i32, _message: &dyn Fn() -> String) {}
}

/// Prints events at or below `shown_level` to stderr. The CLI maps `-v`
/// occurrences to the shown level and `-q` to a level below every event.
pub struct StderrSink {
    shown_level: i32,
}

impl StderrSink {
    #[must_use]
    pub fn new(shown_level: i32) -> Self {
        Self { shown_level }
    }
}

impl EventSink for StderrSink {
    fn emit(&self, level: i32, message: &dyn Fn() -> String) {
        if level <= self.shown_level {
            eprintln!("{}", message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        shown_level: i32,
        displayed: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn emit(&self, level: i32, message: &dyn Fn() -> String) {
            if level <= self.shown_level {
                let _ = message();
                self.displayed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn levels_filter_events() {
        let sink = CountingSink {
            shown_level: LEVEL_STATS,
            displayed: AtomicUsize::new(0),
        };
        sink.emit(LEVEL_STATS, &|| "stats".to_string());
        sink.emit(LEVEL_FILE, &|| "file".to_string());
        assert_eq!(sink.displayed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filtered_messages_are_not_built() {
        let sink = NullSink;
        sink.emit(LEVEL_STATS, &|| panic!("message built for a filtered event"));
    }
}
