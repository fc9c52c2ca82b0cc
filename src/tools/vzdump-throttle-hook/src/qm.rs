// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

use crate::disk::DiskRecord;
use crate::error::Error;
use crate::vmid::VmId;

pub const DEFAULT_QM_PATH: &str = "qm";

/// Access to the live configuration of a guest.
pub trait VmConfig {
    /// Every `key: value` entry of the current guest config.
    fn config_entries(&self, vmid: VmId) -> Result<Vec<DiskRecord>>;

    /// Applies all `records` in a single update, bypassing the guest lock.
    fn update(&self, vmid: VmId, records: &[DiskRecord]) -> Result<()>;
}

/// [`VmConfig`] backed by the Proxmox `qm` command line tool.
#[derive(Debug, Clone)]
pub struct Qm {
    path: PathBuf,
}

impl Default for Qm {
    fn default() -> Self {
        Self::new(DEFAULT_QM_PATH)
    }
}

impl Qm {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Qm { path: path.into() }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        let command = format!("{} {}", self.path.display(), args.join(" "));
        debug!(sl!(), "running command"; "command" => &command);

        let output = Command::new(&self.path)
            .args(args)
            .output()
            .with_context(|| format!("spawn {}", command))?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VmConfig for Qm {
    fn config_entries(&self, vmid: VmId) -> Result<Vec<DiskRecord>> {
        let stdout = self
            .run(&["config".to_string(), vmid.to_string()])
            .context("query guest config")?;
        Ok(parse_config_output(&stdout))
    }

    fn update(&self, vmid: VmId, records: &[DiskRecord]) -> Result<()> {
        self.run(&set_args(vmid, records))
            .context("update guest config")?;
        Ok(())
    }
}

// `qm set <vmid> --skiplock 1 --scsi0 <options> --virtio1 <options> ...`
fn set_args(vmid: VmId, records: &[DiskRecord]) -> Vec<String> {
    let mut args = vec![
        "set".to_string(),
        vmid.to_string(),
        "--skiplock".to_string(),
        "1".to_string(),
    ];
    for record in records {
        args.push(format!("--{}", record.slot_id()));
        args.push(record.options_string());
    }
    args
}

/// Parses the output of `qm config`, keeping every `key: value` line.
///
/// Blank lines, comments (`#...`) and anything after the first section header
/// (`[snapshot]`, `[PENDING]`) are skipped: only the current config counts.
pub fn parse_config_output(output: &str) -> Vec<DiskRecord> {
    let mut records = vec![];

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            break;
        }

        match DiskRecord::parse(line) {
            Ok(record) => records.push(record),
            Err(e) => debug!(sl!(), "skipping config line"; "line" => line, "error" => format!("{:#}", e)),
        }
    }

    records
}
