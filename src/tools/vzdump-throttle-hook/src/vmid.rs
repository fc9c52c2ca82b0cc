// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const VMID_MIN: u32 = 100;
const VMID_MAX: u32 = 999_999_999;

/// Proxmox VE guest id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(u32);

impl VmId {
    pub fn new(id: u32) -> Result<Self, Error> {
        if !(VMID_MIN..=VMID_MAX).contains(&id) {
            return Err(Error::InvalidVmId(id.to_string()));
        }
        Ok(VmId(id))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl FromStr for VmId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u32::from_str takes a leading '+', guest ids never have one
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidVmId(s.to_string()));
        }
        let id = s
            .parse::<u32>()
            .map_err(|_| Error::InvalidVmId(s.to_string()))?;
        VmId::new(id)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vmid() {
        assert_eq!("100".parse::<VmId>().unwrap().as_u32(), 100);
        assert_eq!("999999999".parse::<VmId>().unwrap().as_u32(), 999_999_999);
        assert_eq!("4242".parse::<VmId>().unwrap().to_string(), "4242");

        for bad in ["", "99", "0", "1000000000", "+100", "-100", "10a", "../100", " 100"].iter() {
            assert!(
                matches!(bad.parse::<VmId>(), Err(Error::InvalidVmId(_))),
                "{:?} accepted",
                bad
            );
        }
    }
}
