//! Flat JSON persistence for the event host.
//!
//! The file holds a single object. Only `host` is interpreted; any other
//! keys are carried through untouched so hand edits survive a rewrite.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("{path} is not a valid data file: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode data file: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk shape of the data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The data file plus its in-memory copy. The copy only changes after the
/// file was written successfully.
#[derive(Debug)]
pub struct HostStore {
    path: PathBuf,
    data: StoreData,
}

impl HostStore {
    /// Load `path`, treating a missing file as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no data file yet, starting empty");
                StoreData::default()
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        info!(path = %path.display(), host = ?data.host, "loaded data file");
        Ok(Self { path, data })
    }

    pub fn host(&self) -> Option<&str> {
        self.data.host.as_deref()
    }

    /// Persist a new host, then update the in-memory copy.
    pub fn set_host(&mut self, host: impl Into<String>) -> Result<(), StoreError> {
        let mut next = self.data.clone();
        next.host = Some(host.into());
        write_data(&self.path, &next)?;
        self.data = next;
        Ok(())
    }
}

/// Serialise with 4-space indentation and overwrite the whole file.
fn write_data(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut ser)?;
    std::fs::write(path, buf).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HostStore::load(dir.path().join("data.json")).unwrap();
        assert_eq!(store.host(), None);
    }

    #[test]
    fn null_host_loads_as_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"host": null}"#).unwrap();
        let store = HostStore::load(&path).unwrap();
        assert_eq!(store.host(), None);
    }

    #[test]
    fn set_host_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let mut store = HostStore::load(&path).unwrap();

        store.set_host("<@123>").unwrap();
        assert_eq!(store.host(), Some("<@123>"));

        let reloaded = HostStore::load(&path).unwrap();
        assert_eq!(reloaded.host(), Some("<@123>"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n    \"host\""), "expected 4-space indent: {raw}");
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"host": "old", "note": "keep me"}"#).unwrap();

        let mut store = HostStore::load(&path).unwrap();
        store.set_host("new").unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["host"], "new");
        assert_eq!(value["note"], "keep me");
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the write fail.
        let path = dir.path().join("data.json");
        std::fs::create_dir(&path).unwrap();
        let mut store = HostStore {
            path,
            data: StoreData::default(),
        };

        let err = store.set_host("someone").unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert_eq!(store.host(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            HostStore::load(&path),
            Err(StoreError::Parse { .. })
        ));
    }
}
