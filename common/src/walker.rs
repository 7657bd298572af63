//! Source traversal and job dispatch

use std::sync::Arc;

use async_recursion::async_recursion;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::copier::{self, CopyJob};
use crate::engine::Shared;
use crate::errors::CopyError;

/// What a path is at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    Directory,
    File,
    /// Missing, or something that is neither a regular file nor a directory
    Unknown,
}

pub async fn classify(path: &std::path::Path) -> PathType {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => PathType::Directory,
        Ok(metadata) if metadata.is_file() => PathType::File,
        _ => PathType::Unknown,
    }
}

/// A trailing separator declares the path a directory whether or not it
/// exists yet.
fn has_trailing_separator(path: &std::path::Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .ends_with(std::path::MAIN_SEPARATOR)
}

fn compile_mask(mask: &str) -> Result<globset::GlobMatcher, CopyError> {
    Ok(globset::Glob::new(mask)
        .map_err(|error| CopyError::InvalidArgument(format!("bad filename mask {mask:?}: {error}")))?
        .compile_matcher())
}

/// Create `path` and any missing ancestors, bumping the directories-created
/// counter once per directory this call materializes. Levels another task
/// created first surface as `AlreadyExists` and are not counted.
pub(crate) async fn ensure_dir_counted(
    shared: &Arc<Shared>,
    path: &std::path::Path,
) -> Result<(), CopyError> {
    let mut missing = vec![];
    let mut probe = Some(path);
    while let Some(dir) = probe {
        if dir.as_os_str().is_empty() || classify(dir).await == PathType::Directory {
            break;
        }
        missing.push(dir.to_path_buf());
        probe = dir.parent();
    }
    while let Some(dir) = missing.pop() {
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => shared.progress.directory_created(),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => {
                return Err(CopyError::IoWrite {
                    path: dir,
                    source: error,
                })
            }
        }
    }
    Ok(())
}

/// Classify the source and destination and dispatch copy jobs into
/// `dispatched`. Jobs run concurrently; the engine joins them after the
/// walk returns. A source that does not exist and does not end with a
/// separator is taken as `<directory>/<filename mask>`.
#[instrument(skip(shared, dispatched), level = "debug")]
pub(crate) async fn walk(
    shared: &Arc<Shared>,
    src: &std::path::Path,
    dst: &std::path::Path,
    cancel: &CancellationToken,
    dispatched: &mut tokio::task::JoinSet<()>,
) -> Result<(), CopyError> {
    let src_type = classify(src).await;
    let src_declared_dir = has_trailing_separator(src) || src_type == PathType::Directory;
    let dst_type = classify(dst).await;
    let dst_declared_dir = has_trailing_separator(dst) || dst_type == PathType::Directory;
    if src_declared_dir && dst_type == PathType::File {
        return Err(CopyError::InvalidArgument(format!(
            "source {:?} is a directory but destination {:?} is an existing file",
            src, dst
        )));
    }
    match src_type {
        PathType::Directory => {
            let mask = compile_mask("*")?;
            walk_dir(shared, src, dst, &mask, cancel, dispatched).await
        }
        PathType::File => {
            let dst = if dst_declared_dir {
                match src.file_name() {
                    Some(name) => dst.join(name),
                    None => {
                        return Err(CopyError::InvalidArgument(format!(
                            "source {:?} has no filename",
                            src
                        )))
                    }
                }
            } else {
                dst.to_path_buf()
            };
            dispatch(shared, src.to_path_buf(), dst, cancel, dispatched).await
        }
        PathType::Unknown => {
            if has_trailing_separator(src) {
                // declared a directory but nothing is there
                return Err(CopyError::NotFound {
                    path: src.to_path_buf(),
                });
            }
            let (parent, mask) = match (src.parent(), src.file_name()) {
                (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
                _ => {
                    return Err(CopyError::NotFound {
                        path: src.to_path_buf(),
                    })
                }
            };
            if classify(&parent).await != PathType::Directory {
                return Err(CopyError::NotFound { path: parent });
            }
            let mask = compile_mask(&mask)?;
            walk_dir(shared, &parent, dst, &mask, cancel, dispatched).await
        }
    }
}

/// Depth-first descent: regular files of a directory are dispatched first
/// (mask applied), then its subdirectories are entered. Enumeration order
/// within a directory is whatever the filesystem yields.
#[async_recursion]
async fn walk_dir(
    shared: &Arc<Shared>,
    src_dir: &std::path::Path,
    dst_dir: &std::path::Path,
    mask: &globset::GlobMatcher,
    cancel: &CancellationToken,
    dispatched: &mut tokio::task::JoinSet<()>,
) -> Result<(), CopyError> {
    if cancel.is_cancelled() {
        return Err(CopyError::Cancelled);
    }
    if !shared.bag.is_empty() {
        return Ok(());
    }
    if shared.options.copy_empty_directories {
        ensure_dir_counted(shared, dst_dir).await?;
    }
    let mut entries = tokio::fs::read_dir(src_dir)
        .await
        .map_err(|error| CopyError::IoRead {
            path: src_dir.to_path_buf(),
            source: error,
        })?;
    let mut subdirs = vec![];
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                return Err(CopyError::IoRead {
                    path: src_dir.to_path_buf(),
                    source: error,
                })
            }
        };
        let entry_path = entry.path();
        // follow what the filesystem presents: a symlink to a file copies
        // as a file, a symlink to a directory is descended into
        let entry_type = classify(&entry_path).await;
        match entry_type {
            PathType::Directory => subdirs.push(entry.file_name()),
            PathType::File => {
                if !mask.is_match(entry.file_name()) {
                    continue;
                }
                dispatch(
                    shared,
                    entry_path,
                    dst_dir.join(entry.file_name()),
                    cancel,
                    dispatched,
                )
                .await?;
            }
            PathType::Unknown => {
                tracing::debug!("skipping {:?}, not a regular file or directory", entry_path);
            }
        }
    }
    for name in subdirs {
        walk_dir(
            shared,
            &src_dir.join(&name),
            &dst_dir.join(&name),
            mask,
            cancel,
            dispatched,
        )
        .await?;
    }
    Ok(())
}

/// Reserve a queue slot (the walker's backpressure point) and hand the job
/// to a copy task. The slot travels with the task and frees up when the
/// copy terminates.
async fn dispatch(
    shared: &Arc<Shared>,
    src: std::path::PathBuf,
    dst: std::path::PathBuf,
    cancel: &CancellationToken,
    dispatched: &mut tokio::task::JoinSet<()>,
) -> Result<(), CopyError> {
    if !shared.bag.is_empty() {
        return Ok(());
    }
    let queue_slot = shared.gates.reserve_queue_slot(cancel).await?;
    tracing::debug!("dispatching copy {:?} -> {:?}", &src, &dst);
    dispatched.spawn(copier::copy_file_task(
        shared.clone(),
        CopyJob { src, dst },
        Some(queue_slot),
        cancel.clone(),
    ));
    Ok(())
}
