// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fmt, sync::LazyLock};

use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::{config::ParserConfig, errors::TraceError};

/// Which of strace's mutually exclusive timestamp options produced the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimestampMode {
    None,
    /// `-r`: seconds since the previous syscall, eg. `0.000539`.
    Relative,
    /// `-t`: `15:31:56`.
    TimeOfDay,
    /// `-tt`: `15:32:16.190216`.
    TimeOfDayMicros,
    /// `-ttt`: seconds since the epoch, eg. `1371472360.671434`.
    Epoch,
}

impl TimestampMode {
    #[must_use]
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            TimestampMode::None => None,
            TimestampMode::Relative => Some("-r"),
            TimestampMode::TimeOfDay => Some("-t"),
            TimestampMode::TimeOfDayMicros => Some("-tt"),
            TimestampMode::Epoch => Some("-ttt"),
        }
    }
}

/// Optional columns present on every line of a trace; detected once from its first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceOptions {
    /// `-i`
    pub has_inst_pointer: bool,
    pub timestamp_mode: TimestampMode,
    /// `-T`
    pub has_elapsed_time: bool,
}

impl fmt::Display for TraceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = vec!["-f"];
        if self.has_inst_pointer {
            flags.push("-i");
        }
        if let Some(flag) = self.timestamp_mode.flag() {
            flags.push(flag);
        }
        if self.has_elapsed_time {
            flags.push("-T");
        }
        flags.push("-v");
        write!(f, "{}", flags.join(" "))
    }
}

static CALL_STRUCTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<front>[^(]+)\((?<params>.*)\)\s+=\s+(?<ret>\?|-?[0-9][0-9a-fx]*)(?<after>.*)$")
        .expect("valid regex")
});

/// Inspects the first syscall line of a trace to find which strace options were used.
///
/// The pid column (`-f`) and unabbreviated structures (`-v`) are required; traces without them are rejected.
pub fn detect(line: &str, config: &ParserConfig) -> Result<TraceOptions, TraceError> {
    let line = line.trim();
    if !(line.contains('(') && line.contains(')') && line.contains('=')) {
        return Err(TraceError::format(line, "not a syscall line"));
    }
    let Some(captures) = CALL_STRUCTURE.captures(line) else {
        return Err(TraceError::format(
            line,
            "unable to find the call structure of the first syscall",
        ));
    };

    let mut front: Vec<&str> = captures["front"].split_whitespace().collect();
    match front.len() {
        1 => return Err(TraceError::format(line, "no pid column; strace -f required")),
        2..=4 => {}
        _ => return Err(TraceError::format(line, "unexpected columns before syscall name")),
    }
    // syscall name
    front.pop();
    let pid = front.remove(0);
    if !pid.chars().all(|c| c.is_ascii_digit()) {
        return Err(TraceError::format(line, "pid column is not numeric"));
    }

    let mut has_inst_pointer = false;
    let mut timestamp_mode = TimestampMode::None;
    let mut front = front.into_iter();
    if let Some(column) = front.next() {
        if is_inst_pointer(column) {
            has_inst_pointer = true;
        } else {
            timestamp_mode = classify_timestamp(line, column, config.epoch_threshold)?;
            if let Some(column) = front.next() {
                if !is_inst_pointer(column) {
                    return Err(TraceError::format(
                        line,
                        "expected an instruction pointer after the timestamp",
                    ));
                }
                has_inst_pointer = true;
            }
        }
    }
    if front.next().is_some() {
        return Err(TraceError::format(line, "unexpected columns before syscall name"));
    }

    let params = &captures["params"];
    if config.require_verbose
        && ((params.contains("[/*") && params.contains("*/]")) || params.contains(", ...}"))
    {
        return Err(TraceError::format(
            line,
            "structures are abbreviated; strace -v required",
        ));
    }

    let after = &captures["after"];
    let has_elapsed_time = after.contains('<') && after.contains('>');

    let options = TraceOptions {
        has_inst_pointer,
        timestamp_mode,
        has_elapsed_time,
    };
    debug!("detected strace options {options}");
    Ok(options)
}

fn is_inst_pointer(column: &str) -> bool {
    column.starts_with('[') && column.ends_with(']')
}

fn classify_timestamp(
    line: &str,
    column: &str,
    epoch_threshold: i64,
) -> Result<TimestampMode, TraceError> {
    if column.contains(':') {
        return Ok(if column.contains('.') {
            TimestampMode::TimeOfDayMicros
        } else {
            TimestampMode::TimeOfDay
        });
    }
    let Some((seconds, _)) = column.split_once('.') else {
        return Err(TraceError::format(
            line,
            format!("unrecognized timestamp column {column:?}"),
        ));
    };
    let seconds: i64 = seconds.parse().map_err(|_| {
        TraceError::format(line, format!("unrecognized timestamp column {column:?}"))
    })?;
    // a relative timestamp is a small offset; only a value past the threshold can be an absolute time
    Ok(if seconds > epoch_threshold {
        TimestampMode::Epoch
    } else {
        TimestampMode::Relative
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{config::ParserConfig, errors::TraceError};

    use super::{TimestampMode, TraceOptions, detect};

    const ARGS: &str = r#"open("syscalls.txt", O_RDONLY|O_CREAT, 0664) = 3"#;

    fn detect_default(line: &str) -> Result<TraceOptions, TraceError> {
        detect(line, &ParserConfig::default())
    }

    #[test]
    fn no_options() -> Result<()> {
        let options = detect_default(&format!("8085  {ARGS}"))?;
        assert_eq!(
            options,
            TraceOptions {
                has_inst_pointer: false,
                timestamp_mode: TimestampMode::None,
                has_elapsed_time: false,
            }
        );
        Ok(())
    }

    #[test]
    fn each_option() -> Result<()> {
        let options = detect_default(&format!("8088  [b7739424] {ARGS}"))?;
        assert!(options.has_inst_pointer);
        assert_eq!(options.timestamp_mode, TimestampMode::None);

        let options = detect_default(&format!("8091  0.000539 {ARGS}"))?;
        assert_eq!(options.timestamp_mode, TimestampMode::Relative);

        let options = detect_default(&format!("8094  15:31:56 {ARGS}"))?;
        assert_eq!(options.timestamp_mode, TimestampMode::TimeOfDay);

        let options = detect_default(&format!("8097  15:32:16.190216 {ARGS}"))?;
        assert_eq!(options.timestamp_mode, TimestampMode::TimeOfDayMicros);

        let options = detect_default(&format!("8100  1371472360.671434 {ARGS}"))?;
        // before the default threshold; reads as relative
        assert_eq!(options.timestamp_mode, TimestampMode::Relative);

        let options = detect_default(&format!("8100  1716214232.671434 {ARGS}"))?;
        assert_eq!(options.timestamp_mode, TimestampMode::Epoch);

        let options = detect_default(&format!("8106  {ARGS} <0.000040>"))?;
        assert!(options.has_elapsed_time);
        Ok(())
    }

    #[test]
    fn all_options() -> Result<()> {
        let options = detect_default(&format!(
            "8168  1716214232.416217 [b7782424] {ARGS} <0.000037>"
        ))?;
        assert_eq!(
            options,
            TraceOptions {
                has_inst_pointer: true,
                timestamp_mode: TimestampMode::Epoch,
                has_elapsed_time: true,
            }
        );
        assert_eq!(options.to_string(), "-f -i -ttt -T -v");
        Ok(())
    }

    #[test]
    fn configured_threshold() -> Result<()> {
        let config = ParserConfig {
            epoch_threshold: 1000,
            ..ParserConfig::default()
        };
        let options = detect(&format!("8100  1371472360.671434 {ARGS}"), &config)?;
        assert_eq!(options.timestamp_mode, TimestampMode::Epoch);
        Ok(())
    }

    #[test]
    fn rejected_lines() {
        assert!(matches!(
            detect_default(ARGS),
            Err(TraceError::Format { reason, .. }) if reason.contains("strace -f")
        ));
        assert!(matches!(
            detect_default("8085 hello world"),
            Err(TraceError::Format { .. })
        ));
        assert!(matches!(
            detect_default(&format!("abc {ARGS}")),
            Err(TraceError::Format { .. })
        ));
        assert!(matches!(
            detect_default(&format!("8085 15 {ARGS}")),
            Err(TraceError::Format { .. })
        ));
        assert!(matches!(
            detect_default(&format!("8085 0.1 0.2 {ARGS}")),
            Err(TraceError::Format { .. })
        ));
    }

    #[test]
    fn requires_verbose() -> Result<()> {
        let line = r#"8313  execve("./syscalls", ["./syscalls", "open"], [/* 39 vars */]) = 0"#;
        assert!(matches!(
            detect_default(line),
            Err(TraceError::Format { reason, .. }) if reason.contains("strace -v")
        ));

        let config = ParserConfig {
            require_verbose: false,
            ..ParserConfig::default()
        };
        detect(line, &config)?;
        Ok(())
    }
}
