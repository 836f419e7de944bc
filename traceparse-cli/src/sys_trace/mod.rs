// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use serde::Serialize;

pub use trace::{Diagnostic, SyscallRecord, Trace};

pub mod args;
pub mod strace;
pub mod trace;

/// The syscall tracing utility whose output was parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingUtility {
    Strace,
}

impl fmt::Display for TracingUtility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingUtility::Strace => write!(f, "strace"),
        }
    }
}
