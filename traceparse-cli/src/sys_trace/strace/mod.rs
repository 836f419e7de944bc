// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use log::{debug, trace};
use options::TraceOptions;
use sequencer::{PendingCall, Sequencer, SequencerOutput};
use tokenizer::{RawLineParts, tokenize_line};

use crate::{
    catalog::DefinitionCatalog,
    config::ParserConfig,
    errors::TraceError,
    sys_trace::{
        args::{ArgumentValue, cast::cast_arguments},
        trace::{Diagnostic, SyscallRecord, Timestamp},
    },
};

pub mod options;
pub mod sequencer;
pub mod splitter;
pub mod tokenizer;

/// Output of one parse session, before it's wrapped up with the trace's metadata.
#[derive(Debug)]
pub struct ParsedTrace {
    pub options: TraceOptions,
    pub records: Vec<SyscallRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Position in the record sequence.  An unfinished line reserves one, which is filled in only if the call never
/// resumes.
#[derive(Debug)]
enum Slot {
    Record(SyscallRecord),
    Pending,
    Unfinished(PendingCall),
}

/// Parses the text output of `strace -f -v`, optionally with any of `-i`, `-t`/`-tt`/`-ttt`/`-r`, and `-T`.
#[derive(Debug)]
pub struct StraceParser<'a> {
    catalog: &'a dyn DefinitionCatalog,
    config: &'a ParserConfig,
}

impl<'a> StraceParser<'a> {
    #[must_use]
    pub fn new(catalog: &'a dyn DefinitionCatalog, config: &'a ParserConfig) -> Self {
        Self { catalog, config }
    }

    /// Parses a whole trace.  Any error aborts the parse; there's no partial result.
    pub fn parse(&self, contents: &str) -> Result<ParsedTrace, TraceError> {
        let Some(first_line) = contents.lines().map(str::trim).find(|l| is_call_line(l)) else {
            return Err(TraceError::format("", "trace contains no syscall lines"));
        };
        let options = options::detect(first_line, self.config)?;

        let mut sequencer = Sequencer::new();
        let mut slots: Vec<Slot> = Vec::new();
        // line number of each slot's (first) line, for diagnostics
        let mut slot_lines: Vec<usize> = Vec::new();
        let mut diagnostics = Vec::new();

        for (idx, line) in contents.lines().enumerate() {
            let line_number = idx + 1;
            let line = line.trim();
            let Some(parts) = tokenize_line(line, &options)? else {
                continue;
            };
            trace!("line {line_number}: {:?} {} {}", parts.kind, parts.pid, parts.name);

            let slot = slots.len();
            match sequencer.sequence(parts, line, slot)? {
                SequencerOutput::OnelineSyscall(parts) => {
                    let record =
                        self.build_record(parts, line, None, line_number, &options, &mut diagnostics)?;
                    slots.push(Slot::Record(record));
                    slot_lines.push(line_number);
                }
                SequencerOutput::TwolineSyscall {
                    parts,
                    unfinished_line,
                    unfinished_slot,
                } => {
                    slots[unfinished_slot] = Slot::Pending;
                    let record = self.build_record(
                        parts,
                        line,
                        Some(unfinished_line),
                        line_number,
                        &options,
                        &mut diagnostics,
                    )?;
                    slots.push(Slot::Record(record));
                    slot_lines.push(line_number);
                }
                SequencerOutput::IncompleteSyscall { superseded } => {
                    if let Some(superseded) = superseded {
                        let superseded_slot = superseded.slot;
                        slots[superseded_slot] = Slot::Unfinished(superseded);
                    }
                    slots.push(Slot::Pending);
                    slot_lines.push(line_number);
                }
                SequencerOutput::ContinuedSyscall => {}
            }
        }

        for pending in sequencer.finish() {
            debug!(
                "pid {} {}: unfinished call never resumed",
                pending.pid(),
                pending.name()
            );
            let slot = pending.slot;
            slots[slot] = Slot::Unfinished(pending);
        }

        let mut records = Vec::with_capacity(slots.len());
        for (slot, line_number) in slots.into_iter().zip(slot_lines) {
            match slot {
                Slot::Record(record) => records.push(record),
                Slot::Unfinished(PendingCall { parts, line, .. }) => records.push(self.build_record(
                    parts,
                    &line,
                    None,
                    line_number,
                    &options,
                    &mut diagnostics,
                )?),
                Slot::Pending => {}
            }
        }
        diagnostics.sort_by_key(diagnostic_line);

        Ok(ParsedTrace {
            options,
            records,
            diagnostics,
        })
    }

    fn build_record(
        &self,
        parts: RawLineParts,
        line: &str,
        unfinished_line: Option<String>,
        line_number: usize,
        options: &TraceOptions,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<SyscallRecord, TraceError> {
        let args = if let Some(definition) = self.catalog.resolve(&parts.name) {
            let output = cast_arguments(
                &parts.name,
                parts.kind,
                definition.parameters.as_deref(),
                &parts.raw_args,
            )
            .map_err(|source| TraceError::Cast {
                line: String::from(line),
                source,
            })?;
            diagnostics.extend(output.unmodeled.into_iter().map(|unmodeled| {
                Diagnostic::UnmodeledParameter {
                    syscall: parts.name.clone(),
                    parameter: unmodeled.parameter,
                    type_tag: unmodeled.type_tag,
                    line_number,
                }
            }));
            output.arguments
        } else {
            debug!(
                "line {line_number}: syscall {} is not in the definition catalog",
                parts.name
            );
            diagnostics.push(Diagnostic::UnknownSyscall {
                name: parts.name.clone(),
                line_number,
            });
            parts
                .raw_args
                .iter()
                .map(|token| ArgumentValue::unimplemented(token))
                .collect()
        };

        let timestamp = match parts.timestamp {
            Some(raw) => Some(
                Timestamp::parse(&raw, options.timestamp_mode).ok_or_else(|| {
                    TraceError::format(line, format!("invalid timestamp {raw:?}"))
                })?,
            ),
            None => None,
        };

        Ok(SyscallRecord {
            original_line: String::from(line),
            unfinished_line,
            kind: parts.kind,
            pid: parts.pid,
            name: parts.name,
            args,
            ret: parts.ret,
            inst_pointer: parts.inst_pointer,
            timestamp,
            elapsed_time: parts.elapsed_time,
        })
    }
}

/// True for the lines that can be used to detect the trace's options: anything but blank lines and the lines that
/// aren't a whole syscall.  Signal, exit, unfinished and resumed lines are passed over; a malformed line is kept, so
/// that detection reports it.
fn is_call_line(line: &str) -> bool {
    let mut rest = line.trim();
    if rest.is_empty() {
        return false;
    }
    // pid, timestamp and instruction pointer columns
    for _ in 0..3 {
        match rest.split_once(char::is_whitespace) {
            Some((column, after)) if is_leading_column(column) => rest = after.trim_start(),
            _ => break,
        }
    }
    !(rest.starts_with("+++")
        || rest.starts_with("---")
        || rest.starts_with("<... ")
        || rest.ends_with("<unfinished ...>"))
}

fn is_leading_column(column: &str) -> bool {
    column
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ':')
        || (column.starts_with('[') && column.ends_with(']'))
}

fn diagnostic_line(diagnostic: &Diagnostic) -> usize {
    match diagnostic {
        Diagnostic::UnknownSyscall { line_number, .. }
        | Diagnostic::UnmodeledParameter { line_number, .. } => *line_number,
    }
}
