// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use ini::Ini;

use crate::disk::is_throttle_key;

pub const PROFILE_FILE_NAME: &str = "vzdump-throttle.conf";

/// Throttle options to put on the disks while a backup runs.
///
/// Loaded from an INI style file holding `key=value` lines without a section
/// header, e.g.
///
/// ```text
/// # let the backup read at full speed but keep writes capped
/// mbps_rd_max=2000
/// iops_rd_max=10000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleProfile {
    entries: Vec<(String, String)>,
}

impl ThrottleProfile {
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        ThrottleProfile { entries }
    }

    /// Loads the profile at `path`.
    ///
    /// A missing file and a file without any entry both give `None`: the
    /// throttle options are then removed instead of replaced.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let conf = match Ini::load_from_file(path) {
            Ok(conf) => conf,
            Err(ini::Error::Io(ref e)) if e.kind() == ErrorKind::NotFound => {
                debug!(sl!(), "no throttle profile"; "path" => path.display().to_string());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("load throttle profile {}", path.display()))
            }
        };

        for section in conf.sections().flatten() {
            warn!(sl!(), "ignoring profile section"; "section" => section);
        }

        let mut entries = vec![];
        let general = conf.section(None::<String>).into_iter();
        for (key, value) in general.flat_map(|props| props.iter()) {
            if value.is_empty() {
                warn!(sl!(), "ignoring profile key without value"; "key" => key);
                continue;
            }
            if !is_throttle_key(key) {
                warn!(sl!(), "profile key is not a throttle option"; "key" => key);
            }
            entries.push((key.to_string(), value.to_string()));
        }

        if entries.is_empty() {
            info!(sl!(), "throttle profile is empty"; "path" => path.display().to_string());
            return Ok(None);
        }

        info!(
            sl!(),
            "loaded throttle profile";
            "path" => path.display().to_string(),
            "keys" => entries.len()
        );
        Ok(Some(ThrottleProfile { entries }))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
