// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use crate::error::Error;
use crate::manager::{Outcome, ThrottleConfigManager};
use crate::qm::VmConfig;
use crate::vmid::VmId;

pub const VM_TYPE_QEMU: &str = "qemu";

/// The vzdump hook phases, named the way vzdump passes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    JobInit,
    JobStart,
    JobEnd,
    JobAbort,
    BackupStart,
    BackupEnd,
    BackupAbort,
    LogEnd,
    PreStop,
    PreRestart,
    PostRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RemoveThrottle,
    RestoreThrottle,
}

const PHASES: &[Phase] = &[
    Phase::JobInit,
    Phase::JobStart,
    Phase::JobEnd,
    Phase::JobAbort,
    Phase::BackupStart,
    Phase::BackupEnd,
    Phase::BackupAbort,
    Phase::LogEnd,
    Phase::PreStop,
    Phase::PreRestart,
    Phase::PostRestart,
];

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::JobInit => "job-init",
            Phase::JobStart => "job-start",
            Phase::JobEnd => "job-end",
            Phase::JobAbort => "job-abort",
            Phase::BackupStart => "backup-start",
            Phase::BackupEnd => "backup-end",
            Phase::BackupAbort => "backup-abort",
            Phase::LogEnd => "log-end",
            Phase::PreStop => "pre-stop",
            Phase::PreRestart => "pre-restart",
            Phase::PostRestart => "post-restart",
        }
    }

    /// What the hook does in this phase, `None` for phases it only accepts.
    pub fn action(self) -> Option<Action> {
        match self {
            Phase::BackupStart => Some(Action::RemoveThrottle),
            Phase::BackupEnd | Phase::BackupAbort => Some(Action::RestoreThrottle),
            _ => None,
        }
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PHASES
            .iter()
            .find(|phase| phase.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnknownPhase(s.to_string()))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// vzdump backup mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stop,
    Suspend,
    Snapshot,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(Mode::Stop),
            "suspend" => Ok(Mode::Suspend),
            "snapshot" => Ok(Mode::Snapshot),
            _ => Err(Error::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mode = match self {
            Mode::Stop => "stop",
            Mode::Suspend => "suspend",
            Mode::Snapshot => "snapshot",
        };
        write!(f, "{}", mode)
    }
}

/// One call of the hook, with everything vzdump hands over through the
/// command line and the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInvocation {
    pub phase: Phase,
    pub mode: Option<Mode>,
    pub vmid: Option<VmId>,
    /// Guest type (`qemu`, `lxc`), taken as `qemu` when unknown.
    pub vm_type: Option<String>,
}

impl HookInvocation {
    pub fn parse(
        phase: &str,
        mode: Option<&str>,
        vmid: Option<&str>,
        vm_type: Option<&str>,
    ) -> Result<Self, Error> {
        let phase: Phase = phase.parse()?;
        let vm_type = vm_type.filter(|t| !t.is_empty()).map(str::to_string);

        if phase.action().is_none() {
            // only accepted, whatever follows does not matter
            return Ok(HookInvocation {
                phase,
                mode: mode.and_then(|m| m.parse().ok()),
                vmid: vmid.and_then(|id| id.parse().ok()),
                vm_type,
            });
        }

        let (mode, vmid) = match (mode, vmid) {
            (Some(mode), Some(vmid)) => (mode, vmid),
            _ => return Err(Error::MissingVmContext(phase.to_string())),
        };

        Ok(HookInvocation {
            phase,
            mode: Some(mode.parse()?),
            vmid: Some(vmid.parse()?),
            vm_type,
        })
    }

    pub fn is_qemu(&self) -> bool {
        self.vm_type
            .as_deref()
            .map_or(true, |t| t == VM_TYPE_QEMU)
    }

    /// Only lifting the throttling of a qemu guest reads the throttle
    /// profile; restores replay the saved records as they are.
    pub fn needs_profile(&self) -> bool {
        self.phase.action() == Some(Action::RemoveThrottle) && self.is_qemu()
    }
}

/// Runs the work of `invocation.phase`, if there is any.
pub fn run_hook<V: VmConfig>(
    invocation: &HookInvocation,
    manager: &ThrottleConfigManager<V>,
) -> Result<Outcome> {
    let phase = invocation.phase;
    let action = match phase.action() {
        Some(action) => action,
        None => {
            debug!(sl!(), "nothing to do in this phase"; "phase" => phase.as_str());
            return Ok(Outcome::NothingToDo);
        }
    };

    let vmid = invocation
        .vmid
        .ok_or_else(|| Error::MissingVmContext(phase.to_string()))?;

    info!(
        sl!(),
        "running hook";
        "phase" => phase.as_str(),
        "mode" => invocation.mode.map(|m| m.to_string()).unwrap_or_default(),
        "vmid" => vmid.as_u32()
    );

    if !invocation.is_qemu() {
        info!(
            sl!(),
            "not a qemu guest, nothing to do";
            "vmid" => vmid.as_u32(),
            "vmtype" => invocation.vm_type.clone().unwrap_or_default()
        );
        return Ok(Outcome::NothingToDo);
    }

    match action {
        Action::RemoveThrottle => manager.remove_throttle(vmid),
        Action::RestoreThrottle => manager.restore_throttle(vmid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{FakeVmConfig, THROTTLED_CONFIG};
    use crate::snapshot::SnapshotStore;

    fn vmid(id: u32) -> VmId {
        VmId::new(id).unwrap()
    }

    fn manager(dir: &tempfile::TempDir) -> ThrottleConfigManager<FakeVmConfig> {
        ThrottleConfigManager::new(
            FakeVmConfig::with_config(vmid(100), THROTTLED_CONFIG),
            SnapshotStore::new(dir.path()),
            None,
        )
    }

    #[test]
    fn test_phase_names() {
        for phase in PHASES {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), *phase);
            assert_eq!(phase.to_string(), phase.as_str());
        }
        assert_eq!(Phase::JobInit.as_str(), "job-init");
        assert_eq!(Phase::BackupAbort.as_str(), "backup-abort");
        assert_eq!(Phase::PostRestart.as_str(), "post-restart");

        assert_eq!(Phase::BackupStart.action(), Some(Action::RemoveThrottle));
        assert_eq!(Phase::BackupEnd.action(), Some(Action::RestoreThrottle));
        assert_eq!(Phase::BackupAbort.action(), Some(Action::RestoreThrottle));
        assert_eq!(Phase::LogEnd.action(), None);
        assert_eq!(Phase::JobStart.action(), None);
    }

    #[test]
    fn test_unknown_phase() {
        let err = HookInvocation::parse("backup-middle", Some("snapshot"), Some("100"), None)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownPhase(ref p) if p == "backup-middle"));
        assert!(err.is_user_error());
        assert!(err.to_string().contains("backup-middle"));
    }

    #[test]
    fn test_parse_invocation() {
        let invocation =
            HookInvocation::parse("backup-start", Some("snapshot"), Some("100"), Some("qemu"))
                .unwrap();
        assert_eq!(invocation.phase, Phase::BackupStart);
        assert_eq!(invocation.mode, Some(Mode::Snapshot));
        assert_eq!(invocation.vmid, Some(vmid(100)));
        assert!(invocation.is_qemu());

        // job phases come without mode and vmid
        let invocation = HookInvocation::parse("job-start", None, None, None).unwrap();
        assert_eq!(invocation.phase, Phase::JobStart);
        assert_eq!(invocation.vmid, None);

        let invocation =
            HookInvocation::parse("log-end", Some("whatever"), Some("x"), None).unwrap();
        assert_eq!(invocation.mode, None);
        assert_eq!(invocation.vmid, None);
    }

    #[test]
    fn test_needs_profile() {
        let parse = |phase: &str, vm_type: Option<&str>| {
            HookInvocation::parse(phase, Some("snapshot"), Some("100"), vm_type).unwrap()
        };

        assert!(parse("backup-start", None).needs_profile());
        assert!(parse("backup-start", Some("qemu")).needs_profile());
        assert!(!parse("backup-start", Some("lxc")).needs_profile());
        assert!(!parse("backup-end", None).needs_profile());
        assert!(!parse("backup-abort", None).needs_profile());
        assert!(!parse("job-start", None).needs_profile());
        assert!(!parse("log-end", None).needs_profile());
    }

    #[test]
    fn test_parse_invocation_user_errors() {
        assert!(matches!(
            HookInvocation::parse("backup-start", None, None, None),
            Err(Error::MissingVmContext(_))
        ));
        assert!(matches!(
            HookInvocation::parse("backup-end", Some("stop"), None, None),
            Err(Error::MissingVmContext(_))
        ));
        assert!(matches!(
            HookInvocation::parse("backup-start", Some("pause"), Some("100"), None),
            Err(Error::UnknownMode(_))
        ));
        assert!(matches!(
            HookInvocation::parse("backup-abort", Some("stop"), Some("abc"), None),
            Err(Error::InvalidVmId(_))
        ));
    }

    #[test]
    fn test_noop_phases_leave_guest_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        for phase in [
            "job-init",
            "job-start",
            "job-end",
            "job-abort",
            "log-end",
            "pre-stop",
            "pre-restart",
            "post-restart",
        ]
        .iter()
        {
            let invocation = HookInvocation::parse(phase, Some("stop"), Some("100"), None).unwrap();
            assert_eq!(run_hook(&invocation, &mgr).unwrap(), Outcome::NothingToDo);
        }

        assert!(mgr.vm_config().updates.borrow().is_empty());
        assert!(!mgr.store().exists(vmid(100)));
    }

    #[test]
    fn test_backup_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let start = HookInvocation::parse("backup-start", Some("snapshot"), Some("100"), Some("qemu"))
            .unwrap();
        assert_eq!(run_hook(&start, &mgr).unwrap(), Outcome::Applied(2));
        assert!(mgr.store().exists(vmid(100)));

        let end = HookInvocation::parse("backup-end", Some("snapshot"), Some("100"), Some("qemu"))
            .unwrap();
        assert_eq!(run_hook(&end, &mgr).unwrap(), Outcome::Applied(2));
        assert!(!mgr.store().exists(vmid(100)));

        // vzdump may still report an abort after the end
        let abort =
            HookInvocation::parse("backup-abort", Some("snapshot"), Some("100"), None).unwrap();
        assert_eq!(run_hook(&abort, &mgr).unwrap(), Outcome::NothingToDo);

        assert_eq!(mgr.vm_config().updates.borrow().len(), 2);
    }

    #[test]
    fn test_containers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let invocation =
            HookInvocation::parse("backup-start", Some("suspend"), Some("100"), Some("lxc"))
                .unwrap();
        assert!(!invocation.is_qemu());
        assert_eq!(run_hook(&invocation, &mgr).unwrap(), Outcome::NothingToDo);
        assert!(mgr.vm_config().updates.borrow().is_empty());
    }
}
