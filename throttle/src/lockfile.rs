//! Lock file naming, parsing and contents.
//!
//! A lock file advertises one in-flight transfer. Its name carries everything needed to estimate
//! the backlog of a share:
//!
//! ```text
//! <timestampMs>_<sizeMB:0000>_<host>_<manager>.lock
//! 1700000000000_0250_analysis-01_Manager_7.lock
//! ```
//!
//! The body is informational only (who is copying what, for administrators).

use std::path::PathBuf;

/// Name of the directory holding lock files at the root of a share.
pub const LOCK_DIR_NAME: &str = "DMS_LockFiles";

pub const LOCK_EXTENSION: &str = "lock";

pub const BYTES_PER_MB: u64 = 1024 * 1024;

static LOCK_NAME_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"(?i)^(\d+)_(\d+)_.*\.lock$").expect("lock file name pattern is valid")
});

/// Whole megabytes in `bytes`, rounded down.
pub fn size_mb(bytes: u64) -> u64 {
    bytes / BYTES_PER_MB
}

/// Replace characters that are not valid in a file name (and spaces) with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Host name of this machine, "localhost" if it cannot be determined.
pub fn local_host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Timestamp and size parsed back out of a lock file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEntry {
    pub timestamp_ms: i64,
    pub size_mb: u64,
}

pub fn parse_lock_file_name(name: &str) -> Option<LockEntry> {
    let captures = LOCK_NAME_RE.captures(name)?;
    Some(LockEntry {
        timestamp_ms: captures[1].parse().ok()?,
        size_mb: captures[2].parse().ok()?,
    })
}

/// One transfer as written into a lock directory.
#[derive(Debug, Clone)]
pub struct LockFile {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: PathBuf,
    pub target: PathBuf,
    pub size_bytes: u64,
    pub host: String,
    pub manager: String,
}

impl LockFile {
    /// File name, `collision` > 0 appends a disambiguating suffix.
    pub fn file_name(&self, collision: u32) -> String {
        let stem = format!(
            "{}_{:04}_{}_{}",
            self.timestamp.timestamp_millis(),
            size_mb(self.size_bytes),
            sanitize(&self.host),
            sanitize(&self.manager)
        );
        if collision == 0 {
            format!("{stem}.{LOCK_EXTENSION}")
        } else {
            format!("{stem}_{collision}.{LOCK_EXTENSION}")
        }
    }

    pub fn contents(&self) -> String {
        let local = self.timestamp.with_timezone(&chrono::Local);
        format!(
            "Date: {}\nSource: {}\nTarget: {}\nSize_Bytes: {}\nManager: {}\n",
            local.format("%Y-%m-%d %I:%M:%S %p"),
            self.source.display(),
            self.target.display(),
            self.size_bytes,
            self.manager
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lock_file() -> LockFile {
        LockFile {
            timestamp: chrono::DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            source: "/mnt/proto-3/raw/run 1.raw".into(),
            target: "/mnt/proto-7/cache/run 1.raw".into(),
            size_bytes: 250 * BYTES_PER_MB + 17,
            host: "analysis 01".to_string(),
            manager: "Manager:7".to_string(),
        }
    }

    #[test]
    fn file_name_layout() {
        let lock = lock_file();
        assert_eq!(
            lock.file_name(0),
            "1700000000123_0250_analysis_01_Manager_7.lock"
        );
        assert_eq!(
            lock.file_name(2),
            "1700000000123_0250_analysis_01_Manager_7_2.lock"
        );
    }

    #[test]
    fn small_sizes_are_zero_padded() {
        let lock = LockFile {
            size_bytes: 20 * BYTES_PER_MB,
            ..lock_file()
        };
        assert!(lock.file_name(0).starts_with("1700000000123_0020_"));
    }

    #[test]
    fn contents_lists_transfer() {
        let text = lock_file().contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("Date: "));
        assert_eq!(lines[1], "Source: /mnt/proto-3/raw/run 1.raw");
        assert_eq!(lines[2], "Target: /mnt/proto-7/cache/run 1.raw");
        assert_eq!(lines[3], format!("Size_Bytes: {}", 250 * BYTES_PER_MB + 17));
        assert_eq!(lines[4], "Manager: Manager:7");
    }

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize(r#"a b<c>d:e"f/g\h|i?j*k"#), "a_b_c_d_e_f_g_h_i_j_k");
        assert_eq!(sanitize("tab\there"), "tab_here");
        assert_eq!(sanitize("plain-name.1"), "plain-name.1");
    }

    #[test]
    fn parse_rejects_foreign_files() {
        assert_eq!(parse_lock_file_name("readme.txt"), None);
        assert_eq!(parse_lock_file_name("abc_0010_host_mgr.lock"), None);
        assert_eq!(parse_lock_file_name("1700000000000_0010.lock"), None);
        assert_eq!(
            parse_lock_file_name("1700000000000_0010_host_mgr.LOCK"),
            Some(LockEntry {
                timestamp_ms: 1_700_000_000_000,
                size_mb: 10
            })
        );
    }

    proptest! {
        #[test]
        fn name_parses_back(
            millis in 0i64..4_000_000_000_000,
            size in 0u64..(1u64 << 45),
            host in "[ -~]{0,20}",
            manager in "[ -~]{0,20}",
            collision in 0u32..5,
        ) {
            let lock = LockFile {
                timestamp: chrono::DateTime::from_timestamp_millis(millis).unwrap(),
                source: "src".into(),
                target: "dst".into(),
                size_bytes: size,
                host,
                manager,
            };
            let entry = parse_lock_file_name(&lock.file_name(collision)).unwrap();
            prop_assert_eq!(entry.timestamp_ms, millis);
            prop_assert_eq!(entry.size_mb, size_mb(size));
        }

        #[test]
        fn sanitized_names_have_no_separators(name in "\\PC{0,30}") {
            let clean = sanitize(&name);
            prop_assert!(!clean.contains(['/', '\\', ' ', ':']));
            prop_assert_eq!(clean.chars().count(), name.chars().count());
        }
    }
}
