// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

#[macro_use]
extern crate slog;

logging::logger_with_subsystem!(sl, "throttle-hook");

pub mod disk;
pub mod error;
pub mod hook;
pub mod manager;
pub mod profile;
pub mod qm;
pub mod snapshot;
pub mod vmid;

pub use disk::{DiskOption, DiskRecord};
pub use error::Error;
pub use hook::{run_hook, HookInvocation, Mode, Phase};
pub use manager::{Outcome, ThrottleConfigManager};
pub use profile::ThrottleProfile;
pub use qm::{Qm, VmConfig};
pub use snapshot::{SnapshotStore, ThrottleSnapshot};
pub use vmid::VmId;
