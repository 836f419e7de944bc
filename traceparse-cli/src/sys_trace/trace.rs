// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use current_platform::CURRENT_PLATFORM;
use log::debug;
use serde::Serialize;
use time::{OffsetDateTime, Time};

use crate::{
    catalog::DefinitionCatalog,
    config::ParserConfig,
    errors::TraceError,
    sys_trace::{
        TracingUtility,
        args::ArgumentValue,
        strace::{
            StraceParser,
            options::{TimestampMode, TraceOptions},
            tokenizer::{CallKind, parse_seconds},
        },
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum ReturnValue {
    Int(i64),
    /// eg. `brk` and `mmap` return addresses, `0x9e5d000`.
    Pointer(String),
    /// `?`; the call didn't return, eg. `exit_group`, or was interrupted.
    NoReturn,
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnValue::Int(v) => write!(f, "{v}"),
            ReturnValue::Pointer(p) => write!(f, "{p}"),
            ReturnValue::NoReturn => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyscallReturn {
    pub value: ReturnValue,
    /// errno name, eg. `ENOENT`; present for `-1` returns and for interrupted calls like `= ? ERESTARTSYS`.
    pub error_label: Option<String>,
}

impl fmt::Display for SyscallReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if let Some(label) = &self.error_label {
            write!(f, " {label}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampValue {
    /// `-t` and `-tt`; strace doesn't print a date.
    TimeOfDay(Time),
    /// `-ttt`
    Epoch(OffsetDateTime),
    /// `-r`, time since the previous syscall started.
    Relative(Duration),
}

/// A timestamp column as printed, along with its interpretation under the trace's timestamp mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    pub raw: String,
    #[serde(skip)]
    pub value: TimestampValue,
}

impl Timestamp {
    #[must_use]
    pub fn parse(raw: &str, mode: TimestampMode) -> Option<Timestamp> {
        let value = match mode {
            TimestampMode::None => return None,
            TimestampMode::TimeOfDay | TimestampMode::TimeOfDayMicros => {
                TimestampValue::TimeOfDay(parse_time_of_day(raw)?)
            }
            TimestampMode::Epoch => {
                let since_epoch = parse_seconds(raw)?;
                let nanos = i128::try_from(since_epoch.as_nanos()).ok()?;
                TimestampValue::Epoch(OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?)
            }
            TimestampMode::Relative => TimestampValue::Relative(parse_seconds(raw)?),
        };
        Some(Timestamp {
            raw: String::from(raw),
            value,
        })
    }
}

fn parse_time_of_day(raw: &str) -> Option<Time> {
    let (clock, fraction) = match raw.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (raw, None),
    };
    let mut parts = clock.split(':');
    let hour: u8 = parts.next()?.parse().ok()?;
    let minute: u8 = parts.next()?.parse().ok()?;
    let second: u8 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let micros: u32 = match fraction {
        None => 0,
        Some(f) if !f.is_empty() && f.len() <= 6 && f.chars().all(|c| c.is_ascii_digit()) => {
            format!("{f:0<6}").parse().ok()?
        }
        Some(_) => return None,
    };
    Time::from_hms_micro(hour, minute, second, micros).ok()
}

/// Emitted for the soft-degrade paths of a parse; the trace is still complete, but some of it is untyped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Diagnostic {
    /// The syscall isn't in the definition catalog; all its arguments are `Unimplemented`.
    UnknownSyscall { name: String, line_number: usize },
    /// A parameter whose type has no typed representation.
    UnmodeledParameter {
        syscall: String,
        parameter: String,
        type_tag: Option<String>,
        line_number: usize,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownSyscall { name, line_number } => write!(
                f,
                "line {line_number}: syscall {name} is not in the definition catalog"
            ),
            Diagnostic::UnmodeledParameter {
                syscall,
                parameter,
                type_tag,
                line_number,
            } => write!(
                f,
                "line {line_number}: parameter {parameter} of {syscall} has unmodeled type {}",
                type_tag.as_deref().unwrap_or("(none)")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyscallRecord {
    /// The trace line the record was built from; for a resumed call, the resumed line.
    pub original_line: String,
    /// For a resumed call, the line that started it.
    pub unfinished_line: Option<String>,
    pub kind: CallKind,
    pub pid: u32,
    pub name: String,
    pub args: Vec<ArgumentValue>,
    /// `None` for a call that never resumed.
    pub ret: Option<SyscallReturn>,
    pub inst_pointer: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub elapsed_time: Option<Duration>,
}

impl SyscallRecord {
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.ret.as_ref().is_some_and(|r| {
            r.value != ReturnValue::Int(-1) && r.value != ReturnValue::NoReturn
        })
    }
}

impl fmt::Display for SyscallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.pid, self.name)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        match &self.ret {
            Some(ret) => write!(f, ") = {ret}"),
            None => write!(f, " <unfinished ...>"),
        }
    }
}

/// A fully parsed trace file.  Records are in the order their calls completed; a call that never resumed is kept at
/// the position of its unfinished line.
#[derive(Debug)]
pub struct Trace {
    path: PathBuf,
    tracing_utility: TracingUtility,
    platform: &'static str,
    options: TraceOptions,
    catalog: Arc<dyn DefinitionCatalog>,
    records: Vec<SyscallRecord>,
    diagnostics: Vec<Diagnostic>,
}

impl Trace {
    pub fn open(path: &Path, catalog: Arc<dyn DefinitionCatalog>) -> Result<Trace, TraceError> {
        Trace::open_with_config(path, catalog, &ParserConfig::default())
    }

    pub fn open_with_config(
        path: &Path,
        catalog: Arc<dyn DefinitionCatalog>,
        config: &ParserConfig,
    ) -> Result<Trace, TraceError> {
        let contents = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Trace::from_contents(path, &contents, catalog, config)
    }

    /// Parses trace text that has already been read; `path` is only recorded as metadata.
    pub fn from_contents(
        path: &Path,
        contents: &str,
        catalog: Arc<dyn DefinitionCatalog>,
        config: &ParserConfig,
    ) -> Result<Trace, TraceError> {
        let parsed = StraceParser::new(catalog.as_ref(), config).parse(contents)?;
        debug!(
            "parsed {} records from {path:?} with options {}",
            parsed.records.len(),
            parsed.options
        );
        Ok(Trace {
            path: path.to_path_buf(),
            tracing_utility: TracingUtility::Strace,
            platform: CURRENT_PLATFORM,
            options: parsed.options,
            catalog,
            records: parsed.records,
            diagnostics: parsed.diagnostics,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn tracing_utility(&self) -> TracingUtility {
        self.tracing_utility
    }

    /// Target triple of the build that parsed the trace.
    #[must_use]
    pub fn platform(&self) -> &'static str {
        self.platform
    }

    #[must_use]
    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    #[must_use]
    pub fn catalog(&self) -> &dyn DefinitionCatalog {
        self.catalog.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SyscallRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyscallRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn records(&self) -> &[SyscallRecord] {
        &self.records
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a SyscallRecord;
    type IntoIter = std::slice::Iter<'a, SyscallRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "trace: {}", self.path.display())?;
        writeln!(f, "tracing utility: {}", self.tracing_utility)?;
        writeln!(f, "platform: {}", self.platform)?;
        writeln!(f, "options: {}", self.options)?;
        writeln!(f, "records: {}", self.records.len())?;
        write!(f, "diagnostics: {}", self.diagnostics.len())
    }
}
