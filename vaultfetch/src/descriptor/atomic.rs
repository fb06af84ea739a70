//! Atomic JSON file writes.
//!
//! The descriptor and manifest files are polled by an external process while
//! this one rewrites them, so a reader must never observe a torn write. Every
//! persist goes through [`write_json`]: serialize into a temporary file in the
//! same directory, then rename it into place. The rename is retried a bounded
//! number of times because on Windows an antivirus scanner or the caller's own
//! file watcher can briefly hold the destination open.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tempfile::NamedTempFile;

use super::DescriptorError;

/// Number of rename attempts before giving up.
const PERSIST_ATTEMPTS: u32 = 3;

/// Delay between rename attempts.
const PERSIST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Serialize `value` as pretty JSON and atomically replace the file at `path`.
///
/// The temporary file is created in the destination's parent directory so the
/// final rename never crosses a filesystem boundary.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DescriptorError> {
    let dir = path.parent().ok_or_else(|| DescriptorError::InvalidPath {
        path: path.to_path_buf(),
    })?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| DescriptorError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let body = serde_json::to_vec_pretty(value)?;
    temp.write_all(&body)
        .and_then(|_| temp.flush())
        .map_err(|e| DescriptorError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    persist_with_retry(temp, path)
}

/// Rename the temp file into place, retrying on transient permission errors.
fn persist_with_retry(mut temp: NamedTempFile, path: &Path) -> Result<(), DescriptorError> {
    for attempt in 1..=PERSIST_ATTEMPTS {
        match temp.persist(path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                let retryable = e.error.kind() == std::io::ErrorKind::PermissionDenied
                    && attempt < PERSIST_ATTEMPTS;
                if !retryable {
                    return Err(DescriptorError::WriteFailed {
                        path: path.to_path_buf(),
                        source: e.error,
                    });
                }
                tracing::warn!(
                    path = %path.display(),
                    attempt,
                    "rename blocked by permission error, retrying"
                );
                temp = e.file;
                std::thread::sleep(PERSIST_RETRY_DELAY);
            }
        }
    }
    unreachable!("persist loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_write_json_creates_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.json");

        let mut value = BTreeMap::new();
        value.insert("key".to_string(), 42u64);
        write_json(&path, &value).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, u64> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.get("key"), Some(&42));
    }

    #[test]
    fn test_write_json_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.json");

        fs::write(&path, "{\"key\": 1}").unwrap();

        let mut value = BTreeMap::new();
        value.insert("key".to_string(), 2u64);
        write_json(&path, &value).unwrap();

        let parsed: BTreeMap<String, u64> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.get("key"), Some(&2));
    }

    #[test]
    fn test_write_json_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.json");

        let value: Vec<u32> = vec![1, 2, 3];
        write_json(&path, &value).unwrap();

        let entries: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name(), "record.json");
    }

    #[test]
    fn test_write_json_rejects_rootless_path() {
        let value: Vec<u32> = vec![];
        let result = write_json(Path::new(""), &value);
        assert!(result.is_err());
    }

    #[test]
    fn test_written_file_always_parses() {
        // Overwrite the same path repeatedly; the file must parse as JSON
        // after every completed write.
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record.json");

        for i in 0..20u64 {
            let mut value = BTreeMap::new();
            value.insert("iteration".to_string(), i);
            write_json(&path, &value).unwrap();

            let body = fs::read_to_string(&path).unwrap();
            let parsed: BTreeMap<String, u64> = serde_json::from_str(&body).unwrap();
            assert_eq!(parsed.get("iteration"), Some(&i));
        }
    }
}
