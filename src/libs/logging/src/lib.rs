// Copyright (c) 2024 The vzdump-throttle-hook developers
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io::Write;
use std::process;
use std::str::FromStr;

use slog::{o, Drain, Level};

const LOG_LEVELS: &[(&str, Level)] = &[
    ("trace", Level::Trace),
    ("debug", Level::Debug),
    ("info", Level::Info),
    ("warn", Level::Warning),
    ("error", Level::Error),
    ("critical", Level::Critical),
];

const DEFAULT_SUBSYSTEM: &str = "root";

// Creates a crate-local logging macro that tags every record with the given
// subsystem, e.g. `logger_with_subsystem!(sl, "manager")` gives `sl!()`.
#[macro_export]
macro_rules! logger_with_subsystem {
    ($name: ident, $subsystem: expr) => {
        macro_rules! $name {
            () => {
                slog_scope::logger().new(slog::o!("subsystem" => $subsystem))
            };
        }
    };
}

/// Output encoding of the root logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines, suitable for the vzdump task log.
    Text,
    /// One JSON object per record.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {:?}", s)),
        }
    }
}

// Every drain ends up behind the async drain, so the level filter has to be
// applied before the records are handed over to the logging thread.
fn into_async<D>(drain: D, level: Level) -> (slog_async::Async, slog_async::AsyncGuard)
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let filtered = slog::LevelFilter::new(drain, level).ignore_res();

    slog_async::Async::new(filtered)
        .thread_name("slog-async-logger".into())
        .build_with_guard()
}

/// Creates the root logger writing to `writer`.
///
/// The returned guard must be kept alive for as long as the logger is used;
/// dropping it flushes the records still queued for the logging thread.
pub fn create_logger<W>(
    name: &str,
    source: &str,
    level: Level,
    format: LogFormat,
    writer: W,
) -> (slog::Logger, slog_async::AsyncGuard)
where
    W: Write + Send + 'static,
{
    let (async_drain, guard) = match format {
        LogFormat::Json => {
            let json_drain = slog_json::Json::new(writer)
                .add_default_keys()
                .build()
                .fuse();
            into_async(json_drain, level)
        }
        LogFormat::Text => {
            let decorator = slog_term::PlainSyncDecorator::new(writer);
            let term_drain = slog_term::FullFormat::new(decorator).build().fuse();
            into_async(term_drain, level)
        }
    };

    let logger = slog::Logger::root(
        async_drain.fuse(),
        o!("version" => env!("CARGO_PKG_VERSION"),
            "subsystem" => DEFAULT_SUBSYSTEM,
            "pid" => process::id().to_string(),
            "name" => name.to_string(),
            "source" => source.to_string()),
    );

    (logger, guard)
}

pub fn get_log_levels() -> Vec<&'static str> {
    LOG_LEVELS.iter().map(|(name, _)| *name).collect()
}

pub fn level_name_to_slog_level(level_name: &str) -> Result<Level, String> {
    for (name, level) in LOG_LEVELS {
        if *name == level_name {
            return Ok(*level);
        }
    }

    Err(format!("invalid level name: {:?}", level_name))
}
