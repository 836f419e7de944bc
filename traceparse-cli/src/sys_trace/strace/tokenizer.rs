// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::Serialize;
use winnow::ascii::{dec_int, digit1, hex_digit1, multispace1};
use winnow::combinator::{alt, delimited, terminated};
use winnow::token::{literal, take_till};
use winnow::{ModalResult, Parser};

use crate::errors::TraceError;
use crate::sys_trace::trace::{ReturnValue, SyscallReturn};

use super::options::{TimestampMode, TraceOptions};
use super::splitter::split_arguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallKind {
    /// Invocation and return of the syscall on one line.
    Complete,
    /// While a syscall was in progress on one pid, another pid made a syscall; strace printed the arguments known so
    /// far and ended the line with `<unfinished ...>`.
    Unfinished,
    /// `<... name resumed>` line carrying the remaining arguments and the return value of an unfinished call.
    Resumed,
}

/// Fields of one trace line, before arguments are typed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLineParts {
    pub kind: CallKind,
    pub pid: u32,
    pub name: String,
    pub raw_args: Vec<String>,
    /// `None` for unfinished calls.
    pub ret: Option<SyscallReturn>,
    pub timestamp: Option<String>,
    pub inst_pointer: Option<String>,
    pub elapsed_time: Option<Duration>,
    /// Text following the return value, eg. `(No such file or directory)`, without the elapsed time.
    pub annotation: Option<String>,
    /// A `<... name resumed> <unfinished ...>` line: continues a pending call, which stays pending.
    pub continuation: bool,
}

static RESUMED_UNFINISHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<\.\.\. (?<name>\S+) resumed>(?<args>.*)<unfinished \.\.\.>(\)\s+=\s+\?.*)?$")
        .expect("valid regex")
});

static UNFINISHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<name>[^(]+)\((?<args>.*)<unfinished \.\.\.>$").expect("valid regex")
});

static RESUMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^<\.\.\. (?<name>\S+) resumed>(?<args>.*)\)\s+=\s+(?<ret>[a-fx\d\-?]+)(?<rest>.*)$",
    )
    .expect("valid regex")
});

static COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<name>[^(]+)\((?<args>.*)\)\s+=\s+(?<ret>[a-fx\d\-?]+)(?<rest>.*)$")
        .expect("valid regex")
});

static POLL_REVENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{fd=(?<fd>-?\d+), revents=(?<revents>[^}]+)\}").expect("valid regex")
});

fn group<'h>(captures: &Captures<'h>, name: &str) -> &'h str {
    captures.name(name).map_or("", |m| m.as_str())
}

/// Resumed arguments continue the unfinished line's list, and may start with its separating comma.
fn resumed_args<'h>(captures: &Captures<'h>) -> &'h str {
    let args = group(captures, "args").trim();
    args.strip_prefix(',').unwrap_or(args)
}

/// Splits one line of strace output into its fields.  Returns `Ok(None)` for lines that don't describe a syscall:
/// blank lines, signal delivery (`--- SIGCHLD ... ---`), and process exit (`+++ exited with 0 +++`).
pub fn tokenize_line(
    line: &str,
    options: &TraceOptions,
) -> Result<Option<RawLineParts>, TraceError> {
    let mut input = line.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let pid = parse_pid
        .parse_next(&mut input)
        .map_err(|_| TraceError::format(line, "expected a pid column"))?;
    let pid: u32 = pid
        .parse()
        .map_err(|_| TraceError::format(line, "pid out of range"))?;
    if is_signal_or_exit(input) {
        return Ok(None);
    }

    let timestamp = if options.timestamp_mode == TimestampMode::None {
        None
    } else {
        let timestamp = parse_column
            .parse_next(&mut input)
            .map_err(|_| TraceError::format(line, "expected a timestamp column"))?;
        Some(String::from(timestamp))
    };
    if is_signal_or_exit(input) {
        return Ok(None);
    }

    let inst_pointer = if options.has_inst_pointer {
        let inst_pointer = parse_inst_pointer
            .parse_next(&mut input)
            .map_err(|_| TraceError::format(line, "expected an instruction pointer column"))?;
        Some(String::from(inst_pointer))
    } else {
        None
    };
    if is_signal_or_exit(input) {
        return Ok(None);
    }

    let body = input;
    let (kind, continuation, name, args, outcome) =
        if let Some(c) = RESUMED_UNFINISHED.captures(body) {
            (CallKind::Unfinished, true, group(&c, "name"), resumed_args(&c), None)
        } else if let Some(c) = UNFINISHED.captures(body) {
            (CallKind::Unfinished, false, group(&c, "name"), group(&c, "args"), None)
        } else if let Some(c) = RESUMED.captures(body) {
            (
                CallKind::Resumed,
                false,
                group(&c, "name"),
                resumed_args(&c),
                Some((group(&c, "ret"), group(&c, "rest"))),
            )
        } else if let Some(c) = COMPLETE.captures(body) {
            (
                CallKind::Complete,
                false,
                group(&c, "name"),
                group(&c, "args"),
                Some((group(&c, "ret"), group(&c, "rest"))),
            )
        } else {
            return Err(TraceError::format(line, "unrecognized syscall line"));
        };

    let (ret, elapsed_time, annotation) = match outcome {
        Some((ret, rest)) => {
            let outcome = parse_outcome(line, ret, rest, options)?;
            (Some(outcome.ret), outcome.elapsed_time, outcome.annotation)
        }
        None => (None, None, None),
    };

    Ok(Some(RawLineParts {
        kind,
        pid,
        name: String::from(name.trim()),
        raw_args: split_arguments(args),
        ret,
        timestamp,
        inst_pointer,
        elapsed_time,
        annotation,
        continuation,
    }))
}

fn is_signal_or_exit(input: &str) -> bool {
    input.starts_with("+++") || input.starts_with("---")
}

fn parse_pid<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    terminated(digit1, multispace1).parse_next(input)
}

fn parse_column<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    terminated(take_till(1.., char::is_whitespace), multispace1).parse_next(input)
}

fn parse_inst_pointer<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    terminated(
        delimited(literal("["), take_till(1.., |c: char| c == ']'), literal("]")),
        multispace1,
    )
    .parse_next(input)
}

fn parse_return_value(input: &mut &str) -> ModalResult<ReturnValue> {
    alt((parse_no_return, parse_pointer_return, parse_int_return)).parse_next(input)
}

fn parse_no_return(input: &mut &str) -> ModalResult<ReturnValue> {
    let _ = literal("?").parse_next(input)?;
    Ok(ReturnValue::NoReturn)
}

fn parse_pointer_return(input: &mut &str) -> ModalResult<ReturnValue> {
    let pointer = (literal("0x"), hex_digit1).take().parse_next(input)?;
    Ok(ReturnValue::Pointer(String::from(pointer)))
}

fn parse_int_return(input: &mut &str) -> ModalResult<ReturnValue> {
    let value: i64 = dec_int(input)?;
    Ok(ReturnValue::Int(value))
}

struct Outcome {
    ret: SyscallReturn,
    elapsed_time: Option<Duration>,
    annotation: Option<String>,
}

fn parse_outcome(
    line: &str,
    ret: &str,
    rest: &str,
    options: &TraceOptions,
) -> Result<Outcome, TraceError> {
    let value = parse_return_value
        .parse(ret)
        .map_err(|_| TraceError::format(line, format!("unrecognized return value {ret:?}")))?;
    if let ReturnValue::Int(v) = value
        && v < -1
    {
        return Err(TraceError::format(
            line,
            format!("unexpected negative return value {v}"),
        ));
    }

    let mut rest = rest.trim();
    let first_word = rest.split_whitespace().next().unwrap_or("");
    let has_label = match value {
        ReturnValue::Int(-1) => true,
        ReturnValue::NoReturn => first_word.starts_with(|c: char| c.is_ascii_uppercase()),
        _ => false,
    };
    let error_label = if has_label {
        if !is_error_label(first_word) {
            return Err(TraceError::format(
                line,
                format!("invalid error label {first_word:?}"),
            ));
        }
        rest = rest.strip_prefix(first_word).unwrap_or(rest).trim_start();
        Some(String::from(first_word))
    } else {
        None
    };

    let mut elapsed_time = None;
    let returns = !(value == ReturnValue::NoReturn && error_label.is_none());
    if options.has_elapsed_time && returns {
        let (before, elapsed) = rest
            .rsplit_once('<')
            .and_then(|(before, after)| after.split_once('>').map(|(e, _)| (before, e)))
            .ok_or_else(|| TraceError::format(line, "missing elapsed time"))?;
        elapsed_time = Some(
            parse_seconds(elapsed)
                .ok_or_else(|| TraceError::format(line, format!("invalid elapsed time {elapsed:?}")))?,
        );
        rest = before.trim_end();
    }

    Ok(Outcome {
        ret: SyscallReturn { value, error_label },
        elapsed_time,
        annotation: (!rest.is_empty()).then(|| String::from(rest)),
    })
}

/// Parses `0.000037` style seconds without going through a float, so microsecond values stay exact.
pub(crate) fn parse_seconds(text: &str) -> Option<Duration> {
    let (seconds, fraction) = text.split_once('.').unwrap_or((text, ""));
    if seconds.is_empty()
        || fraction.len() > 9
        || !seconds.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let seconds: u64 = seconds.parse().ok()?;
    let nanos: u32 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().ok()?
    };
    Some(Duration::new(seconds, nanos))
}

/// errno names: `ENOENT`, `E2BIG`, `ERESTART_RESTARTBLOCK`.
fn is_error_label(word: &str) -> bool {
    word.starts_with('E')
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Normalizes syscalls whose printed arguments don't line up one-to-one with their parameters.  Applied once a call
/// has its full argument list; that is, to complete lines and to merged resumed calls.
pub fn fix_arguments(parts: &mut RawLineParts) {
    if parts.name.starts_with("shutdown") {
        // `shutdown(5, 0 /* receive */)` prints the numeric `how` and a description of it
        if let Some(how) = parts.raw_args.get_mut(1) {
            let flag = match how.chars().next() {
                Some('0') => Some("SHUT_RD"),
                Some('1') => Some("SHUT_WR"),
                Some('2') => Some("SHUT_RDWR"),
                _ => None,
            };
            if let Some(flag) = flag {
                *how = String::from(flag);
            }
        }
    } else if parts.name.starts_with("restart_syscall") {
        // `restart_syscall(<... resuming interrupted call ...>)` has no arguments, only a note
        parts.raw_args.clear();
    } else if parts.name == "poll" || parts.name == "ppoll" {
        merge_poll_revents(parts);
    }
}

/// Moves the `revents` that `poll` reports after its return value, eg. `= 1 ([{fd=4, revents=POLLIN}])`, next to
/// the `events` of the matching pollfd argument, so the argument list reads
/// `[{fd=4, events=POLLIN}, revents=POLLIN}, {fd=0, events=POLLIN}]`.
fn merge_poll_revents(parts: &mut RawLineParts) {
    let Some(annotation) = parts.annotation.as_deref() else {
        return;
    };

    for c in POLL_REVENTS.captures_iter(annotation) {
        let fd_token = format!("{{fd={}", group(&c, "fd"));
        let revents = group(&c, "revents");
        let Some(idx) = parts.raw_args.iter().enumerate().position(|(idx, token)| {
            token.trim_start_matches('[') == fd_token
                && parts
                    .raw_args
                    .get(idx + 2)
                    .is_none_or(|next| !next.starts_with("revents="))
        }) else {
            continue;
        };
        let Some(events) = parts.raw_args.get_mut(idx + 1) else {
            continue;
        };
        let revents_token = if let Some(events_only) = events.strip_suffix(']') {
            *events = String::from(events_only);
            format!("revents={revents}}}]")
        } else {
            format!("revents={revents}}}")
        };
        parts.raw_args.insert(idx + 2, revents_token);
    }
}
