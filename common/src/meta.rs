//! Source-to-destination metadata mirroring

use std::os::unix::fs::MetadataExt;
use std::os::unix::prelude::PermissionsExt;
use tracing::instrument;

use crate::errors::CopyError;

/// Length and last-write-time comparison used by the skip-existing check.
/// Nanoseconds are compared only when both filesystems record them.
#[must_use]
pub fn identical_enough(src: &std::fs::Metadata, dst: &std::fs::Metadata) -> bool {
    if src.size() != dst.size() {
        return false;
    }
    if src.mtime() != dst.mtime() {
        return false;
    }
    if src.mtime_nsec() != 0 && dst.mtime_nsec() != 0 && src.mtime_nsec() != dst.mtime_nsec() {
        return false;
    }
    true
}

fn metadata_error(path: &std::path::Path, what: &'static str, errno: nix::errno::Errno) -> CopyError {
    CopyError::IoMetadata {
        path: path.to_path_buf(),
        what,
        source: std::io::Error::from_raw_os_error(errno as i32),
    }
}

/// Mirror timestamps, permission bits and ownership from the source
/// metadata onto `dst`. Timestamps go first; an ownership failure still
/// leaves the times set. Each step raises its own error so callers can tell
/// time-setting and attribute-setting failures apart.
#[instrument]
pub async fn mirror_metadata(
    src_metadata: &std::fs::Metadata,
    dst: &std::path::Path,
) -> Result<(), CopyError> {
    let metadata = src_metadata.clone();
    let dst = dst.to_path_buf();
    let result_path = dst.clone();
    tokio::task::spawn_blocking(move || -> Result<(), CopyError> {
        tracing::debug!("setting timestamps on {:?}", &dst);
        let atime = nix::sys::time::TimeSpec::new(metadata.atime(), metadata.atime_nsec());
        let mtime = nix::sys::time::TimeSpec::new(metadata.mtime(), metadata.mtime_nsec());
        nix::sys::stat::utimensat(
            None,
            &dst,
            &atime,
            &mtime,
            nix::sys::stat::UtimensatFlags::NoFollowSymlink,
        )
        .map_err(|errno| metadata_error(&dst, "timestamps", errno))?;
        tracing::debug!("setting permissions on {:?}", &dst);
        std::fs::set_permissions(
            &dst,
            std::fs::Permissions::from_mode(metadata.permissions().mode()),
        )
        .map_err(|error| CopyError::IoMetadata {
            path: dst.clone(),
            what: "permissions",
            source: error,
        })?;
        tracing::debug!("setting owner on {:?}", &dst);
        nix::unistd::fchownat(
            None,
            &dst,
            Some(nix::unistd::Uid::from_raw(metadata.uid())),
            Some(nix::unistd::Gid::from_raw(metadata.gid())),
            nix::unistd::FchownatFlags::NoFollowSymlink,
        )
        .map_err(|errno| metadata_error(&dst, "owner", errno))?;
        Ok(())
    })
    .await
    .unwrap_or_else(|join_error| {
        Err(CopyError::IoMetadata {
            path: result_path,
            what: "metadata",
            source: std::io::Error::new(std::io::ErrorKind::Other, join_error),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use test_log::test;

    #[test(tokio::test)]
    async fn metadata_is_mirrored() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let src = tmp_dir.join("src.txt");
        let dst = tmp_dir.join("dst.txt");
        tokio::fs::write(&src, b"payload").await.unwrap();
        tokio::fs::write(&dst, b"payload").await.unwrap();
        tokio::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o640))
            .await
            .unwrap();
        // push the source mtime into the past so mirroring is observable
        let past = nix::sys::time::TimeSpec::new(1_000_000_000, 0);
        nix::sys::stat::utimensat(
            None,
            &src,
            &past,
            &past,
            nix::sys::stat::UtimensatFlags::NoFollowSymlink,
        )
        .unwrap();

        let src_metadata = std::fs::metadata(&src).unwrap();
        mirror_metadata(&src_metadata, &dst).await.unwrap();

        let dst_metadata = std::fs::metadata(&dst).unwrap();
        assert_eq!(dst_metadata.mtime(), 1_000_000_000);
        assert_eq!(dst_metadata.permissions().mode() & 0o7777, 0o640);
        testutils::cleanup(&tmp_dir).await;
    }

    #[test(tokio::test)]
    async fn identical_check_compares_length_and_mtime() {
        let tmp_dir = testutils::create_temp_dir().await.unwrap();
        let a = tmp_dir.join("a.txt");
        let b = tmp_dir.join("b.txt");
        tokio::fs::write(&a, b"same").await.unwrap();
        tokio::fs::write(&b, b"same").await.unwrap();
        let md_a = std::fs::metadata(&a).unwrap();
        mirror_metadata(&md_a, &b).await.unwrap();
        let md_b = std::fs::metadata(&b).unwrap();
        assert!(identical_enough(&md_a, &md_b));

        tokio::fs::write(&b, b"longer content").await.unwrap();
        let md_b = std::fs::metadata(&b).unwrap();
        assert!(!identical_enough(&md_a, &md_b));
        testutils::cleanup(&tmp_dir).await;
    }
}
