//! JSON snapshot persistence for the in-memory store
//!
//! The whole store state is serialized to a single JSON document and
//! written atomically (temp file + rename) so a crash mid-write never
//! leaves a torn snapshot.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Charger, DataTransferTemplate, IdTagEntry};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub chargers: Vec<Charger>,
    pub id_tags: Vec<IdTagEntry>,
    pub templates: Vec<DataTransferTemplate>,
    #[serde(default)]
    pub local_list_version: i32,
}

/// Read a snapshot; `Ok(None)` when the file does not exist yet.
pub fn load(path: &Path) -> io::Result<Option<StoreSnapshot>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let snapshot = serde_json::from_str(&text)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(snapshot))
}

/// Write a snapshot atomically.
pub fn save(path: &Path, snapshot: &StoreSnapshot) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = std::env::temp_dir().join("csms-snapshot-test-missing");
        assert!(load(&dir.join("state.json")).unwrap().is_none());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = std::env::temp_dir().join(format!("csms-snapshot-test-{}", std::process::id()));
        let path = dir.join("state.json");

        let mut charger = Charger::new("CP1");
        charger.append_log("booted");
        let snapshot = StoreSnapshot {
            chargers: vec![charger],
            id_tags: vec![IdTagEntry::accepted("TAG-1")],
            templates: vec![],
            local_list_version: 3,
        };
        save(&path, &snapshot).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.chargers.len(), 1);
        assert_eq!(loaded.chargers[0].charge_point_id, "CP1");
        assert_eq!(loaded.chargers[0].logs.len(), 1);
        assert_eq!(loaded.id_tags[0].id_tag, "TAG-1");
        assert_eq!(loaded.local_list_version, 3);

        fs::remove_dir_all(&dir).ok();
    }
}
