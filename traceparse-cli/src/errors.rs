// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use thiserror::Error;

use crate::sys_trace::args::ArgumentKind;

/// Fatal errors for a whole parse.  Any of these aborts the trace; no partial trace is returned.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("unexpected trace line format ({reason}); line was: {line:?}")]
    Format { line: String, reason: String },

    #[error(
        "found resumed syscall {name} for pid {pid} without a matching unfinished call; line was: {line:?}"
    )]
    DanglingResume { line: String, pid: u32, name: String },

    #[error("unable to cast arguments of trace line {line:?}")]
    Cast {
        line: String,
        #[source]
        source: CastError,
    },

    #[error("failed to read trace file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TraceError {
    pub(crate) fn format(line: &str, reason: impl Into<String>) -> Self {
        TraceError::Format {
            line: String::from(line),
            reason: reason.into(),
        }
    }
}

/// Errors casting the raw tokens of a single call into typed arguments.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CastError {
    #[error("token {token:?} is not a valid {target} value")]
    ValueFormat { token: String, target: ArgumentKind },

    #[error("malformed {structure} structure ({reason}); tokens were {tokens:?}")]
    StructureFormat {
        structure: ArgumentKind,
        tokens: Vec<String>,
        reason: String,
    },
}

impl CastError {
    pub(crate) fn value(token: &str, target: ArgumentKind) -> Self {
        CastError::ValueFormat {
            token: String::from(token),
            target,
        }
    }

    pub(crate) fn structure(
        structure: ArgumentKind,
        tokens: &[String],
        reason: impl Into<String>,
    ) -> Self {
        CastError::StructureFormat {
            structure,
            tokens: tokens.to_vec(),
            reason: reason.into(),
        }
    }
}
