// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::{Context, Result};

use crate::disk::DiskRecord;
use crate::profile::ThrottleProfile;
use crate::qm::VmConfig;
use crate::snapshot::{SnapshotStore, ThrottleSnapshot};
use crate::vmid::VmId;

/// What a remove or restore run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NothingToDo,
    /// Number of disk records written to the guest config.
    Applied(usize),
}

/// Lifts the disk throttling of a guest before its backup and puts it back
/// afterwards.
pub struct ThrottleConfigManager<V: VmConfig> {
    vm_config: V,
    store: SnapshotStore,
    profile: Option<ThrottleProfile>,
}

impl<V: VmConfig> ThrottleConfigManager<V> {
    pub fn new(vm_config: V, store: SnapshotStore, profile: Option<ThrottleProfile>) -> Self {
        // an empty profile would only strip, same as no profile at all
        let profile = profile.filter(|p| !p.is_empty());

        ThrottleConfigManager {
            vm_config,
            store,
            profile,
        }
    }

    pub fn vm_config(&self) -> &V {
        &self.vm_config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// The throttled disks of `vmid`, as currently configured.
    pub fn capture_throttled(&self, vmid: VmId) -> Result<ThrottleSnapshot> {
        let records = self
            .vm_config
            .config_entries(vmid)
            .with_context(|| format!("get config of VM {}", vmid))?
            .into_iter()
            .filter(|r| r.is_disk() && r.is_throttled())
            .collect();

        Ok(ThrottleSnapshot::new(vmid, records))
    }

    /// The record to put in place of `record` while the backup runs.
    pub fn replacement_for(&self, record: &DiskRecord) -> DiskRecord {
        match &self.profile {
            Some(profile) => record.merge(profile),
            None => record.strip(),
        }
    }

    pub fn apply_records(&self, vmid: VmId, records: &[DiskRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        for record in records {
            info!(sl!(), "setting disk options"; "vmid" => vmid.as_u32(), "disk" => record.to_string());
        }

        self.vm_config
            .update(vmid, records)
            .with_context(|| format!("apply disk options to VM {}", vmid))
    }

    pub fn remove_throttle(&self, vmid: VmId) -> Result<Outcome> {
        let snapshot = self.capture_throttled(vmid)?;
        if snapshot.is_empty() {
            info!(sl!(), "no throttled disks, nothing to do"; "vmid" => vmid.as_u32());
            return Ok(Outcome::NothingToDo);
        }

        // saved before touching the guest, a failed update must stay restorable
        self.store
            .persist(vmid, &snapshot)
            .context("save original throttle settings")?;

        let replacement: Vec<DiskRecord> = snapshot
            .records
            .iter()
            .map(|r| self.replacement_for(r))
            .collect();

        info!(
            sl!(),
            "removing disk throttling";
            "vmid" => vmid.as_u32(),
            "disks" => replacement.len(),
            "profile" => self.profile.is_some()
        );
        self.apply_records(vmid, &replacement)?;

        Ok(Outcome::Applied(replacement.len()))
    }

    pub fn restore_throttle(&self, vmid: VmId) -> Result<Outcome> {
        let snapshot = match self
            .store
            .load_and_clear(vmid)
            .context("load original throttle settings")?
        {
            Some(snapshot) if !snapshot.is_empty() => snapshot,
            _ => {
                info!(sl!(), "no saved throttle settings, nothing to do"; "vmid" => vmid.as_u32());
                return Ok(Outcome::NothingToDo);
            }
        };

        info!(
            sl!(),
            "restoring disk throttling";
            "vmid" => vmid.as_u32(),
            "disks" => snapshot.len()
        );
        self.apply_records(vmid, &snapshot.records)?;

        Ok(Outcome::Applied(snapshot.len()))
    }
}
