use std::path::{Path, PathBuf};

use throttle::Notification;

/// Write `len` bytes of a repeating, non-trivial pattern.
pub async fn write_pattern(path: &Path, len: u64) {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(path, data).await.unwrap();
}

pub async fn assert_same_contents(a: &Path, b: &Path) {
    let a_data = tokio::fs::read(a).await.unwrap();
    let b_data = tokio::fs::read(b).await.unwrap();
    assert_eq!(a_data.len(), b_data.len(), "{a:?} and {b:?} differ in length");
    assert!(a_data == b_data, "{a:?} and {b:?} differ");
}

pub fn assert_same_mtime(a: &Path, b: &Path) {
    let mtime = |path: &Path| {
        filetime::FileTime::from_last_modification_time(&std::fs::metadata(path).unwrap())
    };
    assert_eq!(mtime(a), mtime(b));
}

pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        notifications.push(notification);
    }
    notifications
}

/// Create a share root under `base` with an empty lock directory.
pub fn share_root(base: &Path, name: &str) -> PathBuf {
    let root = base.join(name);
    std::fs::create_dir_all(lock_dir(&root)).unwrap();
    root
}

pub fn lock_dir(root: &Path) -> PathBuf {
    root.join(throttle::lockfile::LOCK_DIR_NAME)
}

pub fn lock_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "lock"))
        .collect()
}

/// Lock file of another transfer, as some other process would leave it.
pub fn place_lock(dir: &Path, timestamp: chrono::DateTime<chrono::Utc>, size_mb: u64) -> PathBuf {
    let lock = throttle::lockfile::LockFile {
        timestamp,
        source: "/elsewhere/src.raw".into(),
        target: "/elsewhere/dst.raw".into(),
        size_bytes: size_mb * throttle::lockfile::BYTES_PER_MB,
        host: "analysis-02".to_string(),
        manager: "Manager_2".to_string(),
    };
    let path = dir.join(lock.file_name(0));
    std::fs::write(&path, lock.contents()).unwrap();
    path
}
