/*
    writer.rs - Snapshot files for the replica

    Every mutation rewrites the whole file for the concern it touched.
    Files are pretty-printed JSON so operators can read them directly.

    Writes go to a temp file in the same directory, are fsynced, then renamed
    over the target, so a crash mid-write leaves the previous file intact.
*/

use crate::core_persist::errors::{PersistError, PersistResult};
use crate::core_replica::{BlockedAddress, ConfigItem, ReplicaSnapshot};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sink for replica snapshots, called after each applied mutation
pub trait ReplicaPersistence: Send + Sync {
    fn write_config_snapshot(&self, snapshot: &ReplicaSnapshot) -> PersistResult<()>;

    fn write_blocked_snapshot(&self, snapshot: &ReplicaSnapshot) -> PersistResult<()>;
}

/// Writes snapshots to `<data_dir>/config_<id>.json` and `<data_dir>/blocked_ips_<id>.json`
#[derive(Debug, Clone)]
pub struct FileSnapshotWriter {
    data_dir: PathBuf,
    instance_id: String,
}

impl FileSnapshotWriter {
    /// Create a writer, creating `data_dir` if needed
    pub fn new(data_dir: impl Into<PathBuf>, instance_id: impl Into<String>) -> PersistResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            instance_id: instance_id.into(),
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("config_{}.json", file_safe(&self.instance_id)))
    }

    pub fn blocked_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("blocked_ips_{}.json", file_safe(&self.instance_id)))
    }

    /// Read back the persisted items, `None` if never written
    pub fn load_config_snapshot(&self) -> PersistResult<Option<BTreeMap<String, ConfigItem>>> {
        read_json(&self.config_path())
    }

    /// Read back the persisted blocked set, `None` if never written
    pub fn load_blocked_snapshot(&self) -> PersistResult<Option<BTreeMap<String, BlockedAddress>>> {
        let list: Option<Vec<BlockedAddress>> = read_json(&self.blocked_path())?;
        Ok(list.map(|entries| {
            entries
                .into_iter()
                .map(|entry| (entry.address.clone(), entry))
                .collect()
        }))
    }

    /// Combine both files into one snapshot, `None` if neither exists
    pub fn load_snapshot(&self) -> PersistResult<Option<ReplicaSnapshot>> {
        let items = self.load_config_snapshot()?;
        let blocked = self.load_blocked_snapshot()?;

        if items.is_none() && blocked.is_none() {
            return Ok(None);
        }

        Ok(Some(ReplicaSnapshot {
            items: items.unwrap_or_default(),
            blocked: blocked.unwrap_or_default(),
            taken_at: Utc::now(),
        }))
    }
}

impl ReplicaPersistence for FileSnapshotWriter {
    fn write_config_snapshot(&self, snapshot: &ReplicaSnapshot) -> PersistResult<()> {
        let data = serde_json::to_vec_pretty(&snapshot.items)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        write_atomically(&self.config_path(), &data)?;

        debug!(
            "Persisted {} config items to {}",
            snapshot.items.len(),
            self.config_path().display()
        );
        Ok(())
    }

    fn write_blocked_snapshot(&self, snapshot: &ReplicaSnapshot) -> PersistResult<()> {
        let entries: Vec<&BlockedAddress> = snapshot.blocked.values().collect();
        let data = serde_json::to_vec_pretty(&entries)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        write_atomically(&self.blocked_path(), &data)?;

        debug!(
            "Persisted {} blocked addresses to {}",
            entries.len(),
            self.blocked_path().display()
        );
        Ok(())
    }
}

/// Keep instance ids from escaping the data directory
fn file_safe(instance_id: &str) -> String {
    instance_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_atomically(path: &Path, data: &[u8]) -> PersistResult<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PersistError::Storage(format!("invalid path {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> PersistResult<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| PersistError::Deserialization(format!("{}: {}", path.display(), e)))
}
