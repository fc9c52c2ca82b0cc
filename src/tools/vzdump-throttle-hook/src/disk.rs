// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::Error;
use crate::profile::ThrottleProfile;

const OPTION_DELIMITER: &str = ",";
const OPTION_KV_DELIMITER: &str = "=";
const SLOT_DELIMITER: char = ':';

// mbps* is the bandwidth family, iops* the operations family and bps* the
// burst length keys (bps_max_length, bps_rd_max_length, ...).
const THROTTLE_KEY_PREFIXES: &[&str] = &["mbps", "iops", "bps"];

lazy_static! {
    static ref DISK_SLOT_RE: Regex = Regex::new(r"^(ide|sata|scsi|virtio)[0-9]+$").unwrap();
}

pub fn is_throttle_key(key: &str) -> bool {
    THROTTLE_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

/// Returns true for guest config keys naming a disk attachment point that
/// supports throttling, e.g. `scsi0` or `virtio12`.
pub fn is_disk_slot(slot_id: &str) -> bool {
    DISK_SLOT_RE.is_match(slot_id)
}

/// A single `key[=value]` token of a drive option string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskOption {
    pub key: String,
    pub value: Option<String>,
}

impl DiskOption {
    pub fn new(key: &str, value: Option<&str>) -> Self {
        DiskOption {
            key: key.to_owned(),
            value: value.map(|v| v.to_owned()),
        }
    }

    fn from_token(token: &str) -> Self {
        match token.split_once(OPTION_KV_DELIMITER) {
            Some((key, value)) => DiskOption::new(key, Some(value)),
            // the volume id (`local-lvm:vm-100-disk-0`) and bare flags
            None => DiskOption::new(token, None),
        }
    }

    pub fn is_throttle(&self) -> bool {
        is_throttle_key(&self.key)
    }
}

impl fmt::Display for DiskOption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}{}{}", self.key, OPTION_KV_DELIMITER, value),
            None => write!(f, "{}", self.key),
        }
    }
}

/// One disk attachment of a guest: the slot it is attached to and its drive
/// options, in the order the guest config lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    slot_id: String,
    options: Vec<DiskOption>,
}

impl DiskRecord {
    pub fn new(slot_id: &str, options: &str) -> Self {
        let options = options
            .split(OPTION_DELIMITER)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(DiskOption::from_token)
            .collect();

        DiskRecord {
            slot_id: slot_id.to_owned(),
            options,
        }
    }

    /// Parses a `slot_id: options` line as printed by `qm config`.
    pub fn parse(line: &str) -> Result<Self> {
        let (slot_id, options) = line
            .split_once(SLOT_DELIMITER)
            .ok_or_else(|| Error::MalformedRecord(line.to_string()))?;

        let slot_id = slot_id.trim();
        if slot_id.is_empty() || slot_id.contains(char::is_whitespace) {
            return Err(Error::MalformedRecord(line.to_string()).into());
        }

        Ok(DiskRecord::new(slot_id, options.trim()))
    }

    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    pub fn options(&self) -> &[DiskOption] {
        &self.options
    }

    pub fn options_string(&self) -> String {
        self.options
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<String>>()
            .join(OPTION_DELIMITER)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.options.iter().any(|o| o.key == key)
    }

    pub fn is_disk(&self) -> bool {
        is_disk_slot(&self.slot_id)
    }

    pub fn is_throttled(&self) -> bool {
        self.options.iter().any(DiskOption::is_throttle)
    }

    /// Copy of the record without any throttle option.
    pub fn strip(&self) -> DiskRecord {
        DiskRecord {
            slot_id: self.slot_id.clone(),
            options: self
                .options
                .iter()
                .filter(|o| !o.is_throttle())
                .cloned()
                .collect(),
        }
    }

    /// Copy of the record with its throttle options replaced by `profile`.
    ///
    /// Profile keys are appended in profile order after the remaining
    /// options, skipping any key the stripped record already carries.
    pub fn merge(&self, profile: &ThrottleProfile) -> DiskRecord {
        let mut merged = self.strip();

        for (key, value) in profile.iter() {
            if !merged.has_key(key) {
                merged.options.push(DiskOption::new(key, Some(value)));
            }
        }

        merged
    }
}

impl fmt::Display for DiskRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{} {}", self.slot_id, SLOT_DELIMITER, self.options_string())
    }
}
