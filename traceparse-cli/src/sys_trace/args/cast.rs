// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use log::{debug, trace};

use crate::{
    catalog::ParameterDefinition, errors::CastError, sys_trace::strace::tokenizer::CallKind,
};

use super::{
    ArgumentKind, ArgumentValue, FileDescriptor, MissingValue, mode::mode_to_flags,
    pollfd::parse_pollfd_list, sockaddr::parse_sockaddr, stat::parse_stat,
};

/// A parameter whose declared type has no typed representation; its token was kept as `Unimplemented`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmodeledParameter {
    pub parameter: String,
    pub type_tag: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CastOutput {
    pub arguments: Vec<ArgumentValue>,
    pub unmodeled: Vec<UnmodeledParameter>,
}

/// Chooses the representation for one formal parameter.  Decided by the declared type, then by substrings of the
/// parameter name, and for plain integers that could also be flags, by the shape of the token about to be consumed.
#[must_use]
pub fn select_kind(syscall: &str, param: &ParameterDefinition, next_token: &str) -> ArgumentKind {
    let Some(type_tag) = param.type_tag.as_deref() else {
        return ArgumentKind::Unimplemented;
    };
    let name = param.name.as_str();

    match type_tag {
        "char" if param.is_pointer => {
            if name.contains("path") || name.contains("filename") {
                ArgumentKind::Filepath
            } else {
                ArgumentKind::Unimplemented
            }
        }
        "pollfd" if param.is_pointer => ArgumentKind::PollFdList,
        "pollfd" => ArgumentKind::Unimplemented,
        t if t == "int" || t.ends_with("_t") => {
            if is_fd_name(name) {
                ArgumentKind::FileDescriptor
            } else if ["flag", "mode", "prot", "domain"]
                .iter()
                .any(|s| name.contains(s))
                || (syscall.contains("socket") && t == "int" && name.contains("type"))
            {
                ArgumentKind::Flags
            } else if param.is_pointer {
                // strace dereferences int pointers it understands, eg. `socklen_t *addrlen` as `[16]`
                if bracketed(next_token).is_some_and(is_decimal) {
                    ArgumentKind::Int
                } else {
                    ArgumentKind::Hex
                }
            } else if t == "off_t" || t == "size_t" {
                ArgumentKind::Hex
            } else if next_token.contains('|') || !is_decimal(next_token) {
                ArgumentKind::Flags
            } else {
                ArgumentKind::Int
            }
        }
        "sockaddr" => ArgumentKind::Sockaddr,
        "stat" | "stat64" if param.is_struct => ArgumentKind::Stat,
        _ => ArgumentKind::Unimplemented,
    }
}

/// Casts the raw tokens of one call against its formal parameters.
///
/// Parameters are walked in order; each consumes one or more tokens from the front of the remaining slice.  When the
/// tokens run out, a single `MissingValue` marks the first parameter without a value and casting stops; an unfinished
/// call, whose arguments were simply cut off, gets no `MissingValue`.  Tokens left over after the last parameter are
/// each kept as `Unimplemented`, so every input token is represented exactly once in the output.
///
/// `parameters` of `None` marks a syscall whose signature isn't modeled.
pub fn cast_arguments(
    syscall: &str,
    kind: CallKind,
    parameters: Option<&[ParameterDefinition]>,
    tokens: &[String],
) -> Result<CastOutput, CastError> {
    let mut arguments = Vec::with_capacity(tokens.len());
    let mut unmodeled = Vec::new();
    let mut cursor = 0;

    for param in parameters.unwrap_or_default() {
        let Some(next_token) = tokens.get(cursor) else {
            if kind != CallKind::Unfinished {
                arguments.push(ArgumentValue::MissingValue(MissingValue::new(param, None)));
            }
            break;
        };

        let selected = select_kind(syscall, param, next_token);
        trace!("{syscall}: parameter {} cast as {selected}", param.name);
        if selected == ArgumentKind::Unimplemented {
            debug!(
                "{syscall}: no typed representation for parameter {} of type {:?}",
                param.name, param.type_tag
            );
            unmodeled.push(UnmodeledParameter {
                parameter: param.name.clone(),
                type_tag: param.type_tag.clone(),
            });
        }

        let (value, consumed) = construct(selected, &tokens[cursor..])?;
        arguments.push(value.unwrap_or_else(|| {
            ArgumentValue::MissingValue(MissingValue::new(param, Some(next_token)))
        }));
        cursor += consumed;
    }

    arguments.extend(tokens[cursor..].iter().map(|t| ArgumentValue::unimplemented(t)));

    Ok(CastOutput {
        arguments,
        unmodeled,
    })
}

/// Runs the constructor for `kind` on the head of `tokens`.  `None` is the unpopulated sentinel: the call's structure
/// or pointer wasn't dereferenced by strace.
fn construct(
    kind: ArgumentKind,
    tokens: &[String],
) -> Result<(Option<ArgumentValue>, usize), CastError> {
    let token = tokens[0].as_str();
    match kind {
        ArgumentKind::Int => Ok((Some(ArgumentValue::Int(parse_int(token)?)), 1)),
        ArgumentKind::Hex => Ok((Some(ArgumentValue::Hex(parse_hex(token))), 1)),
        ArgumentKind::FileDescriptor => Ok((
            Some(ArgumentValue::FileDescriptor(parse_fd(token)?)),
            1,
        )),
        ArgumentKind::Filepath => Ok((parse_filepath(token).map(ArgumentValue::Filepath), 1)),
        ArgumentKind::Flags => Ok((Some(ArgumentValue::Flags(parse_flags(token))), 1)),
        ArgumentKind::Unimplemented => Ok((Some(ArgumentValue::unimplemented(token)), 1)),
        ArgumentKind::Sockaddr => {
            let (addr, consumed) = parse_sockaddr(tokens)?;
            Ok((addr.map(ArgumentValue::Sockaddr), consumed))
        }
        ArgumentKind::Stat => {
            let (stat, consumed) = parse_stat(tokens)?;
            Ok((stat.map(ArgumentValue::Stat), consumed))
        }
        ArgumentKind::PollFdList => {
            let (list, consumed) = parse_pollfd_list(tokens)?;
            Ok((list.map(ArgumentValue::PollFdList), consumed))
        }
    }
}

/// `fd`, `oldfd`, `epfd`, `fd_in`; not `nfds`, which is a count.
fn is_fd_name(name: &str) -> bool {
    (name.starts_with("fd") && !name.starts_with("fds")) || name.ends_with("fd")
}

fn bracketed(token: &str) -> Option<&str> {
    token.strip_prefix('[').and_then(|t| t.strip_suffix(']'))
}

fn is_decimal(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn parse_int(token: &str) -> Result<i64, CastError> {
    bracketed(token)
        .unwrap_or(token)
        .parse()
        .map_err(|_| CastError::value(token, ArgumentKind::Int))
}

fn parse_hex(token: &str) -> String {
    let token = bracketed(token).unwrap_or(token);
    String::from(token.strip_prefix("0x").unwrap_or(token))
}

fn parse_fd(token: &str) -> Result<FileDescriptor, CastError> {
    // pipe() reports its fd pair as `[3`, `4]`
    let fd = token.trim_matches(|c: char| c == '[' || c == ']');
    if fd == "AT_FDCWD" {
        return Ok(FileDescriptor::AtFdcwd);
    }
    fd.parse()
        .map(FileDescriptor::Number)
        .map_err(|_| CastError::value(token, ArgumentKind::FileDescriptor))
}

fn parse_filepath(token: &str) -> Option<String> {
    if token.len() < 2 {
        return None;
    }
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .map(String::from)
}

fn parse_flags(token: &str) -> Vec<String> {
    if is_decimal(token) {
        return match mode_to_flags(token) {
            // a zero mode is kept as given, eg. the unused mode of `open("f", O_RDONLY, 0)`
            Ok(flags) if flags.is_empty() => vec![String::from(token)],
            Ok(flags) => flags.into_iter().map(String::from).collect(),
            Err(e) => {
                debug!("keeping numeric flags verbatim: {e}");
                vec![String::from(token)]
            }
        };
    }

    let mut flags = Vec::new();
    for flag in token.split('|') {
        if is_decimal(flag) {
            match mode_to_flags(flag) {
                Ok(mode_flags) => flags.extend(mode_flags.into_iter().map(String::from)),
                Err(_) => flags.push(String::from(flag)),
            }
        } else {
            flags.push(String::from(flag));
        }
    }
    flags
}
