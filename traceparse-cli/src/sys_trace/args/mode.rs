// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0:?} is not an octal permission mode")]
pub struct ModeError(pub String);

/// Permission symbols by their octal value, most significant first.  `S_IRWXA` (0777) is handled separately since it
/// spans every digit.
const MODE_FLAGS: [(u32, &str); 12] = [
    (0o700, "S_IRWXU"),
    (0o400, "S_IRUSR"),
    (0o200, "S_IWUSR"),
    (0o100, "S_IXUSR"),
    (0o070, "S_IRWXG"),
    (0o040, "S_IRGRP"),
    (0o020, "S_IWGRP"),
    (0o010, "S_IXGRP"),
    (0o007, "S_IRWXO"),
    (0o004, "S_IROTH"),
    (0o002, "S_IWOTH"),
    (0o001, "S_IXOTH"),
];

/// Expands an octal permission mode, as strace prints it for `mode_t` arguments (eg. `0644`), into the permission
/// symbols it's composed of.  A digit of 7 is reported as the combined `S_IRWX?` symbol, and `777` as `S_IRWXA`.
/// Leading zeros are insignificant; `0` and the empty string have no flags.
pub fn mode_to_flags(mode: &str) -> Result<Vec<&'static str>, ModeError> {
    if !mode.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(ModeError(String::from(mode)));
    }
    let digits = mode.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Vec::new());
    }
    if digits.len() > 3 {
        // setuid/setgid/sticky bits have no symbol here
        return Err(ModeError(String::from(mode)));
    }
    if digits == "777" {
        return Ok(vec!["S_IRWXA"]);
    }

    let mut flags = Vec::new();
    let mut scale = 8u32.pow(u32::try_from(digits.len() - 1).unwrap_or(0));
    for digit in digits.chars() {
        let digit = digit.to_digit(8).unwrap_or(0);
        if digit == 7 {
            flags.extend(
                MODE_FLAGS
                    .iter()
                    .filter(|(value, _)| *value == 7 * scale)
                    .map(|(_, name)| *name),
            );
        } else {
            for (value, name) in MODE_FLAGS {
                if value < scale || value > 7 * scale {
                    continue;
                }
                let bits = value / scale;
                if digit & bits == bits {
                    flags.push(name);
                }
            }
        }
        scale /= 8;
    }
    Ok(flags)
}
