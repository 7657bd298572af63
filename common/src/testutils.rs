#![cfg(test)]

use std::sync::Arc;

use crate::engine::Shared;
use crate::errors::ErrorBag;
use crate::events::NullSink;
use crate::gates::AdmissionGates;
use crate::options::Options;
use crate::progress::Progress;

pub async fn create_temp_dir() -> std::io::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("spcp_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn cleanup(tmp_dir: &std::path::Path) {
    let _ = tokio::fs::remove_dir_all(tmp_dir).await;
}

/// Deterministic non-repeating payload so a misplaced chunk shows up as a
/// byte difference.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 131 + i / 251) % 256) as u8)
        .collect()
}

/// Engine internals wired up with a throwaway sink, for driving the copier
/// and walker directly.
pub fn shared(options: Options) -> Arc<Shared> {
    shared_with_sink(options, Box::new(NullSink))
}

pub fn shared_with_sink(options: Options, sink: Box<dyn crate::events::EventSink>) -> Arc<Shared> {
    let options = options.validated().unwrap();
    let gates = AdmissionGates::new(&options);
    Arc::new(Shared {
        options,
        gates,
        progress: Arc::new(Progress::default()),
        bag: ErrorBag::default(),
        sink,
    })
}

/// Build a small source tree:
/// tree
/// |- 0.txt
/// |- bar
/// |  |- 1.txt
/// |  |- 2.txt
/// |- baz
///    |- 3.bin (a few chunks worth)
pub async fn setup_source_tree(
    tmp_dir: &std::path::Path,
) -> std::io::Result<std::path::PathBuf> {
    let tree = tmp_dir.join("tree");
    tokio::fs::create_dir(&tree).await?;
    tokio::fs::write(tree.join("0.txt"), b"0").await?;
    let bar = tree.join("bar");
    tokio::fs::create_dir(&bar).await?;
    tokio::fs::write(bar.join("1.txt"), b"1").await?;
    tokio::fs::write(bar.join("2.txt"), b"22").await?;
    let baz = tree.join("baz");
    tokio::fs::create_dir(&baz).await?;
    tokio::fs::write(baz.join("3.bin"), patterned_bytes(12_345)).await?;
    Ok(tree)
}

/// Recursively compare two trees: same entries, same file bytes.
pub async fn check_trees_identical(
    src: &std::path::Path,
    dst: &std::path::Path,
) -> std::io::Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((src_dir, dst_dir)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&src_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let src_path = entry.path();
            let dst_path = dst_dir.join(entry.file_name());
            let metadata = tokio::fs::metadata(&src_path).await?;
            if metadata.is_dir() {
                pending.push((src_path, dst_path));
            } else {
                let src_bytes = tokio::fs::read(&src_path).await?;
                let dst_bytes = tokio::fs::read(&dst_path).await.map_err(|error| {
                    std::io::Error::new(
                        error.kind(),
                        format!("destination {:?} missing or unreadable: {error}", &dst_path),
                    )
                })?;
                assert_eq!(src_bytes, dst_bytes, "contents differ for {:?}", &src_path);
            }
        }
    }
    Ok(())
}

/// Count `.incomplete` files anywhere under `root`.
pub async fn incomplete_files(root: &std::path::Path) -> usize {
    let mut count = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|extension| extension == "incomplete")
            {
                count += 1;
            }
        }
    }
    count
}
