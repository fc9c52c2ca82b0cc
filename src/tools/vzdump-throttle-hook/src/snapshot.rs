// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::disk::DiskRecord;
use crate::error::Error;
use crate::vmid::VmId;

// /var/tmp is kept across reboots, so a host going down in the middle of a
// backup still finds the original throttle settings afterwards.
pub const DEFAULT_STATE_DIR: &str = "/var/tmp/vzdump-throttle";
pub const SNAPSHOT_FILE_EXT: &str = "conf";

/// The disk records of one guest as they were before the backup changed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleSnapshot {
    pub vmid: VmId,
    pub records: Vec<DiskRecord>,
}

impl ThrottleSnapshot {
    pub fn new(vmid: VmId, records: Vec<DiskRecord>) -> Self {
        ThrottleSnapshot { vmid, records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// One `slot_id: options` line per record.
    pub fn to_file_contents(&self) -> String {
        let mut contents = String::new();
        for record in &self.records {
            contents.push_str(&record.to_string());
            contents.push('\n');
        }
        contents
    }

    fn from_file_contents(vmid: VmId, contents: &str, path: &Path) -> Result<Self> {
        let mut records = vec![];
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = DiskRecord::parse(line).with_context(|| Error::MalformedSnapshot {
                path: path.display().to_string(),
                line: idx + 1,
            })?;
            records.push(record);
        }

        Ok(ThrottleSnapshot { vmid, records })
    }
}

/// Keeps at most one snapshot file per guest below `root`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        SnapshotStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, vmid: VmId) -> PathBuf {
        self.root.join(format!("{}.{}", vmid, SNAPSHOT_FILE_EXT))
    }

    pub fn exists(&self, vmid: VmId) -> bool {
        self.path_for(vmid).exists()
    }

    /// Writes `snapshot`, replacing any snapshot already stored for `vmid`.
    pub fn persist(&self, vmid: VmId, snapshot: &ThrottleSnapshot) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create state dir {}", self.root.display()))?;

        let path = self.path_for(vmid);
        fs::write(&path, snapshot.to_file_contents())
            .with_context(|| format!("write snapshot {}", path.display()))?;

        debug!(
            sl!(),
            "persisted throttle snapshot";
            "vmid" => vmid.as_u32(),
            "path" => path.display().to_string(),
            "records" => snapshot.len()
        );
        Ok(())
    }

    /// Reads and removes the snapshot stored for `vmid`.
    ///
    /// Returns `None` when there is none. A snapshot that fails to parse is
    /// left on disk.
    pub fn load_and_clear(&self, vmid: VmId) -> Result<Option<ThrottleSnapshot>> {
        let path = self.path_for(vmid);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read snapshot {}", path.display()))
            }
        };

        let snapshot = ThrottleSnapshot::from_file_contents(vmid, &contents, &path)?;

        fs::remove_file(&path).with_context(|| format!("remove snapshot {}", path.display()))?;

        debug!(
            sl!(),
            "loaded throttle snapshot";
            "vmid" => vmid.as_u32(),
            "path" => path.display().to_string(),
            "records" => snapshot.len()
        );
        Ok(Some(snapshot))
    }
}
