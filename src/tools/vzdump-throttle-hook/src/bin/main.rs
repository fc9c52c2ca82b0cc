// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

// vzdump calls the hook as `<hook> <phase> [<mode> <vmid>]` and hands the
// remaining context over in the environment (VMTYPE, DUMPDIR, ...).

use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use slog::{error, o};

use logging::LogFormat;
use vzdump_throttle_hook::profile::PROFILE_FILE_NAME;
use vzdump_throttle_hook::qm::DEFAULT_QM_PATH;
use vzdump_throttle_hook::snapshot::DEFAULT_STATE_DIR;
use vzdump_throttle_hook::{
    run_hook, Error, HookInvocation, Qm, SnapshotStore, ThrottleConfigManager, ThrottleProfile,
};

const NAME: &str = "vzdump-throttle-hook";

const EXIT_FAILURE: i32 = 1;
const EXIT_USER_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[clap(
    name = "vzdump-throttle-hook",
    version,
    about = "vzdump hook lifting per-disk I/O throttling while a guest is backed up"
)]
struct HookArgs {
    /// Hook phase (job-start, backup-start, backup-end, backup-abort, ...)
    phase: String,

    /// Backup mode (stop, suspend, snapshot)
    mode: Option<String>,

    /// Guest id
    vmid: Option<String>,

    /// Guest type as exported by vzdump
    #[clap(long, env = "VMTYPE")]
    vmtype: Option<String>,

    /// Directory keeping the original throttle settings until restored
    #[clap(long, env = "VZDUMP_THROTTLE_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Throttle profile applied during the backup [default: vzdump-throttle.conf next to the hook]
    #[clap(long, env = "VZDUMP_THROTTLE_PROFILE")]
    profile: Option<PathBuf>,

    /// Path of the qm binary
    #[clap(long, default_value = DEFAULT_QM_PATH)]
    qm: PathBuf,

    /// Log level
    #[clap(long, default_value = "info", possible_values = logging::get_log_levels())]
    log_level: String,

    /// Log format (text, json)
    #[clap(long, default_value = "text")]
    log_format: String,
}

fn default_profile_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locate hook executable")?;
    Ok(exe.with_file_name(PROFILE_FILE_NAME))
}

fn real_main(args: HookArgs) -> Result<()> {
    let invocation = HookInvocation::parse(
        &args.phase,
        args.mode.as_deref(),
        args.vmid.as_deref(),
        args.vmtype.as_deref(),
    )?;

    // a broken profile must not keep a restore from running
    let profile = if invocation.needs_profile() {
        let profile_path = match args.profile {
            Some(path) => path,
            None => default_profile_path()?,
        };
        ThrottleProfile::load(&profile_path)?
    } else {
        None
    };

    let manager = ThrottleConfigManager::new(
        Qm::new(args.qm),
        SnapshotStore::new(args.state_dir),
        profile,
    );

    run_hook(&invocation, &manager)?;
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_user_error() => EXIT_USER_ERROR,
        _ => EXIT_FAILURE,
    }
}

fn main() {
    let args = HookArgs::parse();

    let setup = || -> Result<(slog::Level, LogFormat)> {
        let level = logging::level_name_to_slog_level(&args.log_level).map_err(|e| anyhow!(e))?;
        let format = args.log_format.parse::<LogFormat>().map_err(|e| anyhow!(e))?;
        Ok((level, format))
    };
    let (level, format) = match setup() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}: {:#}", NAME, e);
            process::exit(EXIT_USER_ERROR);
        }
    };

    let (logger, async_guard) = logging::create_logger(NAME, "hook", level, format, io::stderr());
    let global_guard = slog_scope::set_global_logger(logger.new(o!()));

    let code = match real_main(args) {
        Ok(()) => 0,
        Err(err) => {
            error!(logger, "hook failed"; "error" => format!("{:#}", err));
            exit_code(&err)
        }
    };

    // flush the async drain before leaving, process::exit skips destructors
    drop(global_guard);
    drop(logger);
    drop(async_guard);

    process::exit(code);
}
