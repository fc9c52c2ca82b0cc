// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown phase {0:?}")]
    UnknownPhase(String),
    #[error("unknown backup mode {0:?}")]
    UnknownMode(String),
    #[error("phase {0:?} needs a backup mode and a VM id")]
    MissingVmContext(String),
    #[error("invalid VM id {0:?}")]
    InvalidVmId(String),
    #[error("malformed disk record {0:?}")]
    MalformedRecord(String),
    #[error("malformed snapshot line {line} in {path}")]
    MalformedSnapshot { path: String, line: usize },
    #[error("{command} failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl Error {
    /// Errors caused by the way the hook was invoked, as opposed to failures
    /// while doing the work.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownPhase(_)
                | Error::UnknownMode(_)
                | Error::MissingVmContext(_)
                | Error::InvalidVmId(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        assert!(Error::UnknownPhase("backup-middle".to_string()).is_user_error());
        assert!(Error::UnknownMode("pause".to_string()).is_user_error());
        assert!(Error::MissingVmContext("backup-start".to_string()).is_user_error());
        assert!(Error::InvalidVmId("abc".to_string()).is_user_error());

        assert!(!Error::MalformedRecord("scsi0".to_string()).is_user_error());
        assert!(!Error::CommandFailed {
            command: "qm config 100".to_string(),
            code: Some(2),
            stderr: "no such VM".to_string(),
        }
        .is_user_error());
    }

    #[test]
    fn test_error_messages_name_the_input() {
        let err = Error::UnknownPhase("backup-middle".to_string());
        assert_eq!(err.to_string(), "unknown phase \"backup-middle\"");

        let err = Error::MalformedSnapshot {
            path: "/var/tmp/vzdump-throttle/100.conf".to_string(),
            line: 3,
        };
        assert_eq!(
            err.to_string(),
            "malformed snapshot line 3 in /var/tmp/vzdump-throttle/100.conf"
        );
    }
}
