use std::sync::Arc;

use rand::Rng;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::chunk;
use crate::engine::Shared;
use crate::errors::CopyError;
use crate::events;
use crate::meta;

/// One file to copy, produced by the walker and consumed by a single
/// file-copy task.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub src: std::path::PathBuf,
    pub dst: std::path::PathBuf,
}

/// Task wrapper around [`copy_one`]: failures are recorded in the engine's
/// bag with the job context attached, cancellation is not a failure, and
/// the queue slot reserved by the walker is given back once the copy
/// terminates either way.
pub(crate) async fn copy_file_task(
    shared: Arc<Shared>,
    job: CopyJob,
    queue_slot: Option<OwnedSemaphorePermit>,
    cancel: CancellationToken,
) {
    match copy_one(&shared, &job, &cancel).await {
        Ok(()) | Err(CopyError::Cancelled) => {}
        Err(error) => {
            let error = CopyError::in_file_copy(&job.src, &job.dst, error);
            tracing::error!("{}", &error);
            shared.bag.push(error);
        }
    }
    drop(queue_slot);
}

/// Copy a single regular file.
///
/// Admission first: a file permit for the whole copy, then the stream
/// permits collected under the acquisition serializer. Data lands in a
/// staging file grown on demand by the workers and is renamed into place
/// only when every chunk has been written, so the destination path never
/// holds a partial file.
#[instrument(skip(shared), level = "debug")]
pub(crate) async fn copy_one(
    shared: &Arc<Shared>,
    job: &CopyJob,
    cancel: &CancellationToken,
) -> Result<(), CopyError> {
    let _file_permit = shared.gates.admit_file(cancel).await?;
    if !shared.bag.is_empty() {
        // a previous file already failed, wind down without starting
        return Ok(());
    }
    shared.progress.file_started();
    let serializer = shared.gates.begin_stream_acquisition(cancel).await?;
    let src_metadata = match tokio::fs::metadata(&job.src).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(CopyError::NotFound {
                path: job.src.clone(),
            })
        }
        Err(error) => {
            return Err(CopyError::IoRead {
                path: job.src.clone(),
                source: error,
            })
        }
    };
    if !src_metadata.is_file() {
        return Err(CopyError::InvalidArgument(format!(
            "{:?} is not a regular file",
            job.src
        )));
    }
    if shared.options.skip_existing_identical {
        if let Ok(dst_metadata) = tokio::fs::metadata(&job.dst).await {
            if dst_metadata.is_file() && meta::identical_enough(&src_metadata, &dst_metadata) {
                shared.emit(events::LEVEL_FILE, || {
                    format!("skip {:?}, destination is identical", job.src)
                });
                shared.progress.file_skipped();
                return Ok(());
            }
        }
    }
    let worker_count = shared.options.worker_count(src_metadata.len());
    let _stream_permits = shared
        .gates
        .acquire_streams(worker_count as u32, cancel)
        .await?;
    drop(serializer);

    shared.emit(events::LEVEL_FILE, || {
        format!(
            "start copy {:?} -> {:?} ({} bytes, {} streams)",
            job.src,
            job.dst,
            src_metadata.len(),
            worker_count
        )
    });
    if let Some(parent) = job.dst.parent() {
        crate::walker::ensure_dir_counted(shared, parent).await?;
    }
    match tokio::fs::remove_file(&job.dst).await {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(CopyError::IoDelete {
                path: job.dst.clone(),
                source: error,
            })
        }
    }
    let staging = if shared.options.use_incomplete_filename {
        staging_path(&job.dst)
    } else {
        job.dst.clone()
    };
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staging)
        .await
        .map_err(|error| CopyError::IoWrite {
            path: staging.clone(),
            source: error,
        })?;

    let cursor = Arc::new(chunk::ChunkCursor::new());
    let resize_gate = Arc::new(chunk::ResizeGate::new(()));
    let mut workers = tokio::task::JoinSet::new();
    for index in 0..worker_count {
        workers.spawn(chunk::run_worker(chunk::WorkerContext {
            source: chunk::source_for_worker(
                &job.src,
                index,
                shared.options.incremental_source_path.as_deref(),
            ),
            staging: staging.clone(),
            buffer_size: shared.options.buffer_size,
            cursor: cursor.clone(),
            resize_gate: resize_gate.clone(),
            progress: shared.progress.clone(),
            cancel: cancel.clone(),
        }));
    }
    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
            Err(join_error) => {
                if first_error.is_none() {
                    first_error = Some(CopyError::IoWrite {
                        path: staging.clone(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, join_error),
                    });
                }
            }
        }
    }
    if cancel.is_cancelled() {
        remove_staging_best_effort(&staging).await;
        return Err(CopyError::Cancelled);
    }
    if let Some(error) = first_error {
        remove_staging_best_effort(&staging).await;
        return Err(error);
    }

    if staging != job.dst {
        match tokio::fs::remove_file(&job.dst).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(CopyError::IoDelete {
                    path: job.dst.clone(),
                    source: error,
                })
            }
        }
        tokio::fs::rename(&staging, &job.dst)
            .await
            .map_err(|error| CopyError::IoRename {
                from: staging.clone(),
                to: job.dst.clone(),
                source: error,
            })?;
    }
    meta::mirror_metadata(&src_metadata, &job.dst).await?;
    shared.progress.file_copied();
    shared.emit(events::LEVEL_FILE, || {
        format!("end copy {:?} ({} bytes)", job.dst, src_metadata.len())
    });
    Ok(())
}

async fn remove_staging_best_effort(staging: &std::path::Path) {
    if let Err(error) = tokio::fs::remove_file(staging).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("could not remove incomplete file {:?}: {}", staging, error);
        }
    }
}

/// `<destination-with-trailing-dots-stripped>.<random-token>.incomplete`,
/// next to the destination so the final rename stays on one volume.
fn staging_path(dst: &std::path::Path) -> std::path::PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let token: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    dst.with_file_name(format!(
        "{}.{}.incomplete",
        name.trim_end_matches('.'),
        token
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use std::os::unix::fs::MetadataExt;
    use test_log::test;

    #[test]
    fn staging_path_strips_trailing_dots() {
        let staged = staging_path(std::path::Path::new("/tmp/out/archive.tar..."));
        let name = staged.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("archive.tar."));
        assert!(name.ends_with(".incomplete"));
        assert_eq!(staged.parent().unwrap(), std::path::Path::new("/tmp/out"));
    }

    #[test]
    fn staging_tokens_differ() {
        let dst = std::path::Path::new("/tmp/out/data.bin");
        assert_ne!(staging_path(dst), staging_path(dst));
    }

    #[test(tokio::test)]
    async fn copies_a_small_file() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("in.bin");
        let dst = tmp_dir.join("out").join("in.bin");
        let payload = testutils::patterned_bytes(1024);
        tokio::fs::write(&src, &payload).await.unwrap();

        let shared = testutils::shared(Default::default());
        let job = CopyJob {
            src: src.clone(),
            dst: dst.clone(),
        };
        copy_one(&shared, &job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dst).await.unwrap(), payload);
        let snapshot = shared.progress.get();
        assert_eq!(snapshot.files_copied, 1);
        assert_eq!(snapshot.bytes_copied, 1024);
        // the destination directory holds only the finalized file
        assert_eq!(testutils::incomplete_files(&tmp_dir.join("out")).await, 0);
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn multi_stream_copy_is_byte_exact() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("big.bin");
        let dst = tmp_dir.join("big.out");
        let payload = testutils::patterned_bytes(256 * 1024 + 3);
        tokio::fs::write(&src, &payload).await.unwrap();

        // tiny buffer and chunk allotment so several streams are elected
        let shared = testutils::shared(crate::options::Options {
            buffer_size: 4096,
            min_chunks_per_thread: 2,
            ..Default::default()
        });
        let job = CopyJob {
            src: src.clone(),
            dst: dst.clone(),
        };
        copy_one(&shared, &job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dst).await.unwrap(), payload);
        assert_eq!(shared.progress.get().bytes_copied, payload.len() as u64);
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn one_start_and_one_end_event_per_file() {
        struct Recorder(std::sync::Arc<std::sync::Mutex<Vec<String>>>);
        impl crate::events::EventSink for Recorder {
            fn emit(&self, _level: i32, message: &dyn Fn() -> String) {
                self.0.lock().unwrap().push(message());
            }
        }

        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("tiny.bin");
        let dst = tmp_dir.join("tiny.out");
        tokio::fs::write(&src, testutils::patterned_bytes(1024))
            .await
            .unwrap();

        let messages = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        let shared = testutils::shared_with_sink(
            Default::default(),
            Box::new(Recorder(messages.clone())),
        );
        copy_one(
            &shared,
            &CopyJob {
                src: src.clone(),
                dst: dst.clone(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let messages = messages.lock().unwrap();
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.starts_with("start copy"))
                .count(),
            1
        );
        assert_eq!(
            messages.iter().filter(|m| m.starts_with("end copy")).count(),
            1
        );
        // a 1 KB file stays below the multi-stream threshold
        assert!(messages
            .iter()
            .any(|m| m.starts_with("start copy") && m.contains("1 streams")));
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn mirrors_length_and_mtime() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("meta.bin");
        let dst = tmp_dir.join("meta.out");
        tokio::fs::write(&src, testutils::patterned_bytes(2048))
            .await
            .unwrap();

        let shared = testutils::shared(Default::default());
        copy_one(
            &shared,
            &CopyJob {
                src: src.clone(),
                dst: dst.clone(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let src_metadata = std::fs::metadata(&src).unwrap();
        let dst_metadata = std::fs::metadata(&dst).unwrap();
        assert_eq!(src_metadata.len(), dst_metadata.len());
        assert_eq!(src_metadata.mtime(), dst_metadata.mtime());
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn skips_identical_destination() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("again.bin");
        let dst = tmp_dir.join("again.out");
        tokio::fs::write(&src, b"stable contents").await.unwrap();

        let shared = testutils::shared(crate::options::Options {
            skip_existing_identical: true,
            ..Default::default()
        });
        let job = CopyJob {
            src: src.clone(),
            dst: dst.clone(),
        };
        let cancel = CancellationToken::new();
        copy_one(&shared, &job, &cancel).await.unwrap();
        assert_eq!(shared.progress.get().files_copied, 1);

        copy_one(&shared, &job, &cancel).await.unwrap();
        let snapshot = shared.progress.get();
        assert_eq!(snapshot.files_copied, 1);
        assert_eq!(snapshot.files_skipped, 1);
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn in_place_mode_writes_the_destination_directly() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("plain.bin");
        let dst = tmp_dir.join("plain.out");
        let payload = testutils::patterned_bytes(4096);
        tokio::fs::write(&src, &payload).await.unwrap();

        let shared = testutils::shared(crate::options::Options {
            use_incomplete_filename: false,
            ..Default::default()
        });
        copy_one(
            &shared,
            &CopyJob {
                src: src.clone(),
                dst: dst.clone(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), payload);
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn pre_cancelled_copy_leaves_no_destination() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("never.bin");
        let dst = tmp_dir.join("never.out");
        tokio::fs::write(&src, testutils::patterned_bytes(8192))
            .await
            .unwrap();

        let shared = testutils::shared(Default::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = copy_one(
            &shared,
            &CopyJob {
                src: src.clone(),
                dst: dst.clone(),
            },
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(CopyError::Cancelled)));
        assert!(!dst.exists());
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn missing_source_is_not_found() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let shared = testutils::shared(Default::default());
        let result = copy_one(
            &shared,
            &CopyJob {
                src: tmp_dir.join("absent.bin"),
                dst: tmp_dir.join("absent.out"),
            },
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CopyError::NotFound { .. })));
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn overwrites_existing_destination() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("new.bin");
        let dst = tmp_dir.join("old.bin");
        tokio::fs::write(&src, b"new contents").await.unwrap();
        tokio::fs::write(&dst, b"previous, longer contents")
            .await
            .unwrap();

        let shared = testutils::shared(Default::default());
        copy_one(
            &shared,
            &CopyJob {
                src: src.clone(),
                dst: dst.clone(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"new contents");
        testutils::cleanup(&tmp_dir).await;
    }
}
