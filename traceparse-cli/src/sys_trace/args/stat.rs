// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use serde::Serialize;

use crate::errors::CastError;

use super::{ArgumentKind, take_braced};

const STAT_FIELD_COUNT: usize = 15;

/// `struct stat` as printed by `strace -v`; the fields are kept as their raw `name=value` text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatBuffer {
    pub fields: Vec<String>,
}

impl StatBuffer {
    /// Value of the named field, eg. `get("st_size")`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find_map(|field| {
            field
                .split_once('=')
                .filter(|(name, _)| *name == key)
                .map(|(_, value)| value)
        })
    }
}

impl fmt::Display for StatBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.fields.join(", "))
    }
}

pub(crate) fn parse_stat(tokens: &[String]) -> Result<(Option<StatBuffer>, usize), CastError> {
    // an address strace didn't dereference, or a null pointer
    if tokens
        .first()
        .is_some_and(|t| t.starts_with("0x") || t == "0" || t == "NULL")
    {
        return Ok((None, 1));
    }

    let consumed = take_braced(ArgumentKind::Stat, tokens)?;
    let raw = &tokens[..consumed];

    let mut fields: Vec<String> = Vec::with_capacity(STAT_FIELD_COUNT);
    let mut iter = raw.iter().enumerate();
    while let Some((idx, token)) = iter.next() {
        let mut field = token.as_str();
        if idx == 0 {
            field = field.strip_prefix('{').unwrap_or(field);
        }
        if idx == consumed - 1 {
            field = field.strip_suffix('}').unwrap_or(field);
        }
        let mut field = String::from(field);
        // makedev(major, minor) was split by the argument splitter
        if field.starts_with("st_dev=makedev(")
            && !field.ends_with(')')
            && let Some((next_idx, next)) = iter.next()
        {
            let next = if next_idx == consumed - 1 {
                next.strip_suffix('}').unwrap_or(next)
            } else {
                next
            };
            field.push_str(", ");
            field.push_str(next);
        }
        fields.push(field);
    }

    if fields.len() != STAT_FIELD_COUNT {
        return Err(CastError::structure(
            ArgumentKind::Stat,
            raw,
            format!(
                "expected {STAT_FIELD_COUNT} fields but found {}",
                fields.len()
            ),
        ));
    }
    Ok((Some(StatBuffer { fields }), consumed))
}
