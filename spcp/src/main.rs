use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "spcp",
    version,
    about = "Copy files and directory trees using multiple concurrent files and multiple read/write streams per file",
    long_about = "`spcp` copies a file or an entire directory tree using several files in flight at \
once and several positioned read/write streams per file. On high-latency, high-bandwidth storage \
links (network filesystems such as SSHFS in particular) a sequential copy cannot saturate the \
link; striping chunks across concurrent streams can.

Files are staged under a `.incomplete` name and renamed into place when complete, so the \
destination path never holds a partial file.

EXAMPLES:
    # Copy a tree with a progress bar and summary
    spcp /mnt/remote/data /srv/data --progress --summary

    # Only files matching a mask (the source path itself does not exist)
    spcp '/mnt/remote/logs/*.log' /srv/logs

    # Parallelize a single-connection SSHFS mount via sibling mounts
    # (/mnt/r_2, /mnt/r_3, ... must point at the same remote)
    spcp /mnt/r/big.iso /srv/big.iso --incremental-source-path /mnt/r"
)]
struct Args {
    /// Source file or directory. A path that does not exist and has no
    /// trailing separator is read as `<directory>/<filename mask>`.
    src: String,

    /// Destination path. A trailing separator declares a directory. A
    /// directory destination that does not exist yet is created when the
    /// first file is written into it (immediately with
    /// --copy-empty-directories).
    dst: String,

    // Concurrency
    /// Maximum number of files copied simultaneously
    #[arg(long, default_value = "4", value_name = "N", help_heading = "Concurrency")]
    max_concurrent_files: usize,

    /// Maximum read/write streams per file (clamped to --max-total-threads)
    #[arg(long, default_value = "4", value_name = "N", help_heading = "Concurrency")]
    max_threads_per_file: usize,

    /// Maximum read/write streams across all files
    #[arg(long, default_value = "4", value_name = "N", help_heading = "Concurrency")]
    max_total_threads: usize,

    /// Bytes per chunk and per read/write buffer (e.g. "128KiB", "1MiB")
    #[arg(
        long,
        default_value = "131072",
        value_name = "SIZE",
        help_heading = "Concurrency"
    )]
    buffer_size: bytesize::ByteSize,

    /// Backpressure bound on copy jobs queued ahead of the copier
    #[arg(long, default_value = "50", value_name = "N", help_heading = "Concurrency")]
    max_file_queue_length: usize,

    /// A file gets an extra stream only per this many chunks of length
    #[arg(long, default_value = "32", value_name = "N", help_heading = "Concurrency")]
    min_chunks_per_thread: u64,

    // Copy options
    /// Write the destination file directly instead of staging to a
    /// `.incomplete` name and renaming into place
    #[arg(long, help_heading = "Copy options")]
    no_incomplete_filename: bool,

    /// Create destination directories for empty source directories too
    #[arg(long, help_heading = "Copy options")]
    copy_empty_directories: bool,

    /// Skip files whose destination already matches the source by length
    /// and modification time
    #[arg(long, help_heading = "Copy options")]
    skip_existing: bool,

    /// Absolute source prefix to rewrite to `<prefix>_<n>` for streams
    /// beyond the first, so a single-connection-per-path network mount
    /// opens one connection per stream
    #[arg(long, value_name = "PATH", help_heading = "Copy options")]
    incremental_source_path: Option<std::path::PathBuf>,

    // Progress & output
    /// Show a progress bar
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Print summary statistics at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level: -v statistics / -vv per-file events (also raises the
    /// log level: -v INFO / -vv DEBUG / -vvv TRACE)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of runtime worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = runtime default)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

fn main() {
    let args = Args::parse();
    let options = common::Options {
        max_concurrent_files: args.max_concurrent_files,
        max_threads_per_file: args.max_threads_per_file,
        max_total_threads: args.max_total_threads,
        buffer_size: args.buffer_size.0 as usize,
        max_file_queue_length: args.max_file_queue_length,
        use_incomplete_filename: !args.no_incomplete_filename,
        copy_empty_directories: args.copy_empty_directories,
        incremental_source_path: args.incremental_source_path.clone(),
        min_chunks_per_thread: args.min_chunks_per_thread,
        skip_existing_identical: args.skip_existing,
    };
    let shown_level = if args.quiet { -1 } else { args.verbose as i32 };
    let engine =
        match common::CopyEngine::with_sink(options, Box::new(common::StderrSink::new(shown_level)))
        {
            Ok(engine) => engine,
            Err(error) => {
                eprintln!("spcp: {error}");
                std::process::exit(1);
            }
        };
    let settings = common::RunSettings {
        quiet: args.quiet,
        verbose: args.verbose,
        summary: args.summary,
        progress: args.progress,
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let progress = engine.progress();
    let result = common::run(&settings, progress, move |cancel| async move {
        engine
            .copy(
                std::path::Path::new(&args.src),
                std::path::Path::new(&args.dst),
                &cancel,
            )
            .await
    });
    if result.is_none() {
        std::process::exit(1);
    }
}
