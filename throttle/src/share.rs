//! Mapping a file path to the lock directory of the share it lives on.
//!
//! Two path forms participate in lock coordination:
//!
//! - UNC-style paths: `\\server\share\dir\file` (or `//server/share/...`) use
//!   `\\server\DMS_LockFiles`.
//! - Paths below a configured share root (a mounted network share such as `/mnt/proto-7`) use
//!   `<root>/DMS_LockFiles`; the last component of the root names the host.
//!
//! Anything else is a local path and never gets a lock file. A candidate lock directory is only
//! used if it already exists.

use std::path::{Path, PathBuf};

use crate::lockfile::LOCK_DIR_NAME;

#[derive(Debug, Clone, Default)]
pub struct ShareSettings {
    /// Mount points of network shares.
    pub share_roots: Vec<PathBuf>,
    /// Host name substitutions applied before building a UNC lock directory, e.g. a DNS alias
    /// that must share the lock directory of the real server.
    pub host_aliases: Vec<(String, String)>,
}

/// A share that supports lock coordination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub host: String,
    pub lock_dir: PathBuf,
}

fn resolve_alias<'a>(host: &'a str, settings: &'a ShareSettings) -> &'a str {
    settings
        .host_aliases
        .iter()
        .find(|(from, _)| from.eq_ignore_ascii_case(host))
        .map_or(host, |(_, to)| to.as_str())
}

fn unc_share(path: &Path, settings: &ShareSettings) -> Option<Share> {
    let text = path.to_string_lossy();
    let separator = if text.starts_with(r"\\") {
        '\\'
    } else if text.starts_with("//") {
        '/'
    } else {
        return None;
    };
    let host = text[2..].split(['\\', '/']).next()?;
    if host.is_empty() {
        return None;
    }
    let host = resolve_alias(host, settings).to_string();
    let lock_dir = PathBuf::from(format!(
        "{separator}{separator}{host}{separator}{LOCK_DIR_NAME}"
    ));
    Some(Share { host, lock_dir })
}

fn mounted_share(path: &Path, settings: &ShareSettings) -> Option<Share> {
    let root = settings
        .share_roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())?;
    let host = root
        .file_name()
        .map_or_else(|| root.to_string_lossy(), |name| name.to_string_lossy())
        .into_owned();
    Some(Share {
        host: resolve_alias(&host, settings).to_string(),
        lock_dir: root.join(LOCK_DIR_NAME),
    })
}

/// Candidate share for `path` without touching the filesystem.
pub fn resolve(path: &Path, settings: &ShareSettings) -> Option<Share> {
    unc_share(path, settings).or_else(|| mounted_share(path, settings))
}

/// Share for `path` whose lock directory exists, `None` for local paths.
pub async fn lock_directory(path: &Path, settings: &ShareSettings) -> Option<Share> {
    let share = resolve(path, settings)?;
    match tokio::fs::metadata(&share.lock_dir).await {
        Ok(metadata) if metadata.is_dir() => Some(share),
        Ok(_) => {
            tracing::debug!("{:?} is not a directory, no lock coordination", &share.lock_dir);
            None
        }
        Err(error) => {
            tracing::debug!(
                "lock directory {:?} not available: {}",
                &share.lock_dir,
                error
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unc_backslash_path() {
        let share = resolve(
            Path::new(r"\\proto-7\Cache\2024\dataset.raw"),
            &ShareSettings::default(),
        )
        .unwrap();
        assert_eq!(share.host, "proto-7");
        assert_eq!(share.lock_dir, PathBuf::from(r"\\proto-7\DMS_LockFiles"));
    }

    #[test]
    fn unc_forward_slash_path() {
        let share = resolve(
            Path::new("//proto-7/Cache/dataset.raw"),
            &ShareSettings::default(),
        )
        .unwrap();
        assert_eq!(share.lock_dir, PathBuf::from("//proto-7/DMS_LockFiles"));
    }

    #[test]
    fn unc_alias_is_applied() {
        let settings = ShareSettings {
            host_aliases: vec![("archive-alias".to_string(), "archive".to_string())],
            ..Default::default()
        };
        let share = resolve(Path::new(r"\\ARCHIVE-ALIAS\dms\f.raw"), &settings).unwrap();
        assert_eq!(share.host, "archive");
        assert_eq!(share.lock_dir, PathBuf::from(r"\\archive\DMS_LockFiles"));
    }

    #[test]
    fn local_paths_have_no_share() {
        let settings = ShareSettings::default();
        assert_eq!(resolve(Path::new("/data/file.raw"), &settings), None);
        assert_eq!(resolve(Path::new("relative/file.raw"), &settings), None);
        assert_eq!(resolve(Path::new(r"\\"), &settings), None);
    }

    #[test]
    fn deepest_share_root_wins() {
        let settings = ShareSettings {
            share_roots: vec!["/mnt".into(), "/mnt/proto-7".into()],
            ..Default::default()
        };
        let share = resolve(Path::new("/mnt/proto-7/cache/f.raw"), &settings).unwrap();
        assert_eq!(share.host, "proto-7");
        assert_eq!(share.lock_dir, PathBuf::from("/mnt/proto-7/DMS_LockFiles"));
        let share = resolve(Path::new("/mnt/other/f.raw"), &settings).unwrap();
        assert_eq!(share.lock_dir, PathBuf::from("/mnt/DMS_LockFiles"));
        // component-wise prefix, not string prefix
        assert_eq!(resolve(Path::new("/mnt2/f.raw"), &settings), None);
    }

    #[tokio::test]
    async fn lock_directory_must_exist() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let root = tmp_dir.path().join("proto-9");
        tokio::fs::create_dir(&root).await.unwrap();
        let settings = ShareSettings {
            share_roots: vec![root.clone()],
            ..Default::default()
        };
        let file = root.join("data.raw");
        assert_eq!(lock_directory(&file, &settings).await, None);
        tokio::fs::create_dir(root.join(LOCK_DIR_NAME)).await.unwrap();
        let share = lock_directory(&file, &settings).await.unwrap();
        assert_eq!(share.host, "proto-9");
        assert_eq!(share.lock_dir, root.join(LOCK_DIR_NAME));
    }
}
