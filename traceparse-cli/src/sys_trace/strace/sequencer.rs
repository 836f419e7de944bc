// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;

use log::{debug, trace};

use crate::errors::TraceError;

use super::tokenizer::{CallKind, RawLineParts, fix_arguments};

/// An unfinished syscall waiting for its `<... name resumed>` line.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub parts: RawLineParts,
    pub line: String,
    /// Position reserved for the call in the trace's output, used if it never resumes.
    pub slot: usize,
}

impl PendingCall {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.parts.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.parts.name
    }

    #[must_use]
    pub fn partial_args(&self) -> &[String] {
        &self.parts.raw_args
    }
}

/// Unfinished calls of one parse session, keyed by (pid, syscall name).
#[derive(Debug, Default)]
pub struct PendingCallTable {
    calls: HashMap<(u32, String), PendingCall>,
}

impl PendingCallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the call previously pending under the same key, if any.
    pub fn insert(&mut self, call: PendingCall) -> Option<PendingCall> {
        self.calls.insert((call.pid(), call.parts.name.clone()), call)
    }

    pub fn remove(&mut self, pid: u32, name: &str) -> Option<PendingCall> {
        self.calls.remove(&(pid, String::from(name)))
    }

    #[must_use]
    pub fn lookup(&self, pid: u32, name: &str) -> Option<&PendingCall> {
        self.calls.get(&(pid, String::from(name)))
    }

    fn lookup_mut(&mut self, pid: u32, name: &str) -> Option<&mut PendingCall> {
        self.calls.get_mut(&(pid, String::from(name)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Removes every pending call, in the order their unfinished lines appeared.
    pub fn drain(&mut self) -> Vec<PendingCall> {
        let mut calls: Vec<PendingCall> = self.calls.drain().map(|(_, call)| call).collect();
        calls.sort_by_key(|call| call.slot);
        calls
    }
}

#[derive(Debug, PartialEq)]
pub enum SequencerOutput {
    /// An strace line that included both invocation and completion of the syscall.
    OnelineSyscall(RawLineParts),
    /// The arguments of an unfinished line followed by those of its resumed line, with the return value of the
    /// resumed line.
    TwolineSyscall {
        parts: RawLineParts,
        unfinished_line: String,
        unfinished_slot: usize,
    },
    /// An strace line that started a syscall that hasn't been completed.  If another call with the same pid and name
    /// was already pending, it will never be resumed and is handed back.
    IncompleteSyscall { superseded: Option<PendingCall> },
    /// A `<... name resumed> <unfinished ...>` line; its arguments were added to the pending call.
    ContinuedSyscall,
}

/// Sequencer merges together the arguments of "unfinished" and "resumed" syscalls, so that a syscall interrupted
/// during tracing can be treated the same as one that wasn't.
#[derive(Debug, Default)]
pub struct Sequencer {
    pending: PendingCallTable,
}

impl Sequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `slot` is the output position reserved for this line, should it turn out to be an unfinished call that never
    /// resumes.
    pub fn sequence(
        &mut self,
        mut parts: RawLineParts,
        line: &str,
        slot: usize,
    ) -> Result<SequencerOutput, TraceError> {
        match parts.kind {
            CallKind::Complete => {
                fix_arguments(&mut parts);
                Ok(SequencerOutput::OnelineSyscall(parts))
            }
            CallKind::Unfinished if parts.continuation => {
                let Some(pending) = self.pending.lookup_mut(parts.pid, &parts.name) else {
                    return Err(dangling_resume(line, &parts));
                };
                trace!(
                    "pid {} {}: continued with {} more arguments",
                    parts.pid,
                    parts.name,
                    parts.raw_args.len()
                );
                pending.parts.raw_args.append(&mut parts.raw_args);
                Ok(SequencerOutput::ContinuedSyscall)
            }
            CallKind::Unfinished => {
                let superseded = self.pending.insert(PendingCall {
                    parts,
                    line: String::from(line),
                    slot,
                });
                if let Some(superseded) = &superseded {
                    debug!(
                        "pid {} {}: unfinished call was never resumed before the next one started",
                        superseded.pid(),
                        superseded.name()
                    );
                }
                Ok(SequencerOutput::IncompleteSyscall { superseded })
            }
            CallKind::Resumed => {
                let Some(pending) = self.pending.remove(parts.pid, &parts.name) else {
                    return Err(dangling_resume(line, &parts));
                };
                let PendingCall {
                    parts: unfinished,
                    line: unfinished_line,
                    slot: unfinished_slot,
                } = pending;

                let mut raw_args = unfinished.raw_args;
                raw_args.append(&mut parts.raw_args);
                let mut parts = RawLineParts {
                    raw_args,
                    // the call started when the unfinished line was printed
                    timestamp: unfinished.timestamp.or(parts.timestamp),
                    inst_pointer: unfinished.inst_pointer.or(parts.inst_pointer),
                    ..parts
                };
                fix_arguments(&mut parts);
                Ok(SequencerOutput::TwolineSyscall {
                    parts,
                    unfinished_line,
                    unfinished_slot,
                })
            }
        }
    }

    #[must_use]
    pub fn pending(&self) -> &PendingCallTable {
        &self.pending
    }

    /// Ends the session, returning calls that were never resumed.
    pub fn finish(mut self) -> Vec<PendingCall> {
        self.pending.drain()
    }
}

fn dangling_resume(line: &str, parts: &RawLineParts) -> TraceError {
    TraceError::DanglingResume {
        line: String::from(line),
        pid: parts.pid,
        name: parts.name.clone(),
    }
}
