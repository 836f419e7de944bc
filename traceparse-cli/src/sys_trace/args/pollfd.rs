// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use serde::Serialize;

use crate::errors::CastError;

use super::ArgumentKind;

/// One `struct pollfd` entry.  `revents` is only known when the returned events were merged in from the trailing
/// annotation of a `poll` line, eg. `= 1 ([{fd=4, revents=POLLIN}])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollFd {
    pub fd: i64,
    pub events: String,
    pub revents: Option<String>,
}

impl fmt::Display for PollFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{fd={}, events={}", self.fd, self.events)?;
        if let Some(revents) = &self.revents {
            write!(f, ", revents={revents}")?;
        }
        write!(f, "}}")
    }
}

/// Parses the `[{fd=4, events=POLLIN}, {fd=0, events=POLLIN}]` array of `poll`/`ppoll`.  `None` when only the
/// array's address was printed.
pub(crate) fn parse_pollfd_list(
    tokens: &[String],
) -> Result<(Option<Vec<PollFd>>, usize), CastError> {
    let error = |consumed: usize, reason: &str| {
        CastError::structure(
            ArgumentKind::PollFdList,
            &tokens[..consumed.min(tokens.len())],
            reason,
        )
    };

    match tokens.first().map(String::as_str) {
        Some("[]") => return Ok((Some(Vec::new()), 1)),
        Some(first) if first.starts_with("0x") || first == "NULL" => return Ok((None, 1)),
        Some(first) if first.starts_with('[') => {}
        _ => return Err(error(1, "expected an opening '['")),
    }

    let mut list = Vec::new();
    let mut cursor = 0;
    loop {
        let Some(fd_token) = tokens.get(cursor) else {
            return Err(error(cursor, "missing closing ']'"));
        };
        let fd_text = fd_token
            .trim_start_matches('[')
            .strip_prefix("{fd=")
            .ok_or_else(|| error(cursor + 1, "expected {fd=..."))?;
        let fd = fd_text
            .parse::<i64>()
            .map_err(|_| CastError::value(fd_text, ArgumentKind::PollFdList))?;
        cursor += 1;

        let Some(events_token) = tokens.get(cursor) else {
            return Err(error(cursor, "missing events"));
        };
        let mut done = events_token.ends_with(']');
        let events = events_token
            .trim_end_matches(']')
            .trim_end_matches('}')
            .strip_prefix("events=")
            .ok_or_else(|| error(cursor + 1, "expected events=..."))?;
        cursor += 1;

        let mut revents = None;
        if let Some(revents_token) = tokens.get(cursor)
            && let Some(value) = revents_token.strip_prefix("revents=")
        {
            done = done || value.ends_with(']');
            revents = Some(String::from(value.trim_end_matches(']').trim_end_matches('}')));
            cursor += 1;
        }

        list.push(PollFd {
            fd,
            events: String::from(events),
            revents,
        });
        if done {
            return Ok((Some(list), cursor));
        }
    }
}
