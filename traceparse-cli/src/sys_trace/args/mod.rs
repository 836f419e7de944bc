// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use serde::Serialize;

use crate::{catalog::ParameterDefinition, errors::CastError};

pub mod cast;
pub mod mode;
pub mod pollfd;
pub mod sockaddr;
pub mod stat;

pub use pollfd::PollFd;
pub use sockaddr::{SocketAddress, UnixPath};
pub use stat::StatBuffer;

/// A typed syscall argument.  Each variant is produced by one constructor in `cast`, chosen by `cast::select_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum ArgumentValue {
    Int(i64),
    /// Raw digits of a pointer or size value, without any `0x` prefix.
    Hex(String),
    FileDescriptor(FileDescriptor),
    /// Path with the surrounding quotes removed; escapes are left as strace printed them.
    Filepath(String),
    Flags(Vec<String>),
    Sockaddr(SocketAddress),
    Stat(StatBuffer),
    PollFdList(Vec<PollFd>),
    /// A token no variant models, kept verbatim.
    Unimplemented(String),
    MissingValue(MissingValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileDescriptor {
    Number(i64),
    /// `AT_FDCWD`, the "relative to the current directory" sentinel of the `*at` syscalls.
    AtFdcwd,
}

/// Placeholder for a parameter the trace line didn't supply a usable value for; either the line had too few tokens,
/// or the kernel didn't populate a structure and strace printed its address instead.
#[derive(Debug, Clone, Serialize)]
pub struct MissingValue {
    pub expected: ParameterDefinition,
    pub given: Option<String>,
}

impl MissingValue {
    #[must_use]
    pub fn new(expected: &ParameterDefinition, given: Option<&str>) -> Self {
        Self {
            expected: expected.clone(),
            given: given.map(String::from),
        }
    }
}

// Two missing values are equal when they stand in for the same declared type; there is no value to order by.
impl PartialEq for MissingValue {
    fn eq(&self, other: &Self) -> bool {
        self.expected.type_tag == other.expected.type_tag
    }
}

impl Eq for MissingValue {}

/// Tag for each `ArgumentValue` variant; the result of parameter type dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArgumentKind {
    Int,
    Hex,
    FileDescriptor,
    Filepath,
    Flags,
    Sockaddr,
    Stat,
    PollFdList,
    Unimplemented,
}

impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgumentKind::Int => "int",
            ArgumentKind::Hex => "hex",
            ArgumentKind::FileDescriptor => "file descriptor",
            ArgumentKind::Filepath => "file path",
            ArgumentKind::Flags => "flags",
            ArgumentKind::Sockaddr => "sockaddr",
            ArgumentKind::Stat => "stat",
            ArgumentKind::PollFdList => "pollfd list",
            ArgumentKind::Unimplemented => "unimplemented",
        };
        write!(f, "{name}")
    }
}

impl ArgumentValue {
    #[must_use]
    pub fn kind(&self) -> Option<ArgumentKind> {
        match self {
            ArgumentValue::Int(_) => Some(ArgumentKind::Int),
            ArgumentValue::Hex(_) => Some(ArgumentKind::Hex),
            ArgumentValue::FileDescriptor(_) => Some(ArgumentKind::FileDescriptor),
            ArgumentValue::Filepath(_) => Some(ArgumentKind::Filepath),
            ArgumentValue::Flags(_) => Some(ArgumentKind::Flags),
            ArgumentValue::Sockaddr(_) => Some(ArgumentKind::Sockaddr),
            ArgumentValue::Stat(_) => Some(ArgumentKind::Stat),
            ArgumentValue::PollFdList(_) => Some(ArgumentKind::PollFdList),
            ArgumentValue::Unimplemented(_) => Some(ArgumentKind::Unimplemented),
            ArgumentValue::MissingValue(_) => None,
        }
    }

    #[must_use]
    pub fn unimplemented(token: &str) -> Self {
        ArgumentValue::Unimplemented(String::from(token))
    }

    #[must_use]
    pub fn flags(flags: &[&str]) -> Self {
        ArgumentValue::Flags(flags.iter().map(|f| String::from(*f)).collect())
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileDescriptor::Number(fd) => write!(f, "{fd}"),
            FileDescriptor::AtFdcwd => write!(f, "AT_FDCWD"),
        }
    }
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentValue::Int(v) => write!(f, "{v}"),
            ArgumentValue::Hex(raw) | ArgumentValue::Unimplemented(raw) => write!(f, "{raw}"),
            ArgumentValue::FileDescriptor(fd) => write!(f, "{fd}"),
            ArgumentValue::Filepath(path) => write!(f, "\"{path}\""),
            ArgumentValue::Flags(flags) if flags.is_empty() => write!(f, "0"),
            ArgumentValue::Flags(flags) => write!(f, "{}", flags.join("|")),
            ArgumentValue::Sockaddr(addr) => write!(f, "{addr}"),
            ArgumentValue::Stat(stat) => write!(f, "{stat}"),
            ArgumentValue::PollFdList(list) => {
                write!(f, "[")?;
                for (i, pollfd) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{pollfd}")?;
                }
                write!(f, "]")
            }
            ArgumentValue::MissingValue(missing) => {
                write!(f, "{}", missing.given.as_deref().unwrap_or(""))
            }
        }
    }
}

/// Collects the tokens of a `{...}` structure that the naive comma split broke apart: the first token must open the
/// brace, and collection stops at the first token that closes one.  Returns the number of tokens the structure spans.
pub(crate) fn take_braced(structure: ArgumentKind, tokens: &[String]) -> Result<usize, CastError> {
    match tokens.first() {
        Some(first) if first.starts_with('{') => {}
        _ => {
            return Err(CastError::structure(
                structure,
                &tokens[..tokens.len().min(1)],
                "expected an opening '{'",
            ));
        }
    }
    tokens
        .iter()
        .position(|t| t.ends_with('}'))
        .map(|idx| idx + 1)
        .ok_or_else(|| CastError::structure(structure, tokens, "missing closing '}'"))
}
