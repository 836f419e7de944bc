// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fmt, net::Ipv4Addr, str::FromStr as _};

use serde::Serialize;

use crate::errors::CastError;

use super::{ArgumentKind, take_braced};

/// Decoded `struct sockaddr`, eg. `{sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr("127.0.0.1")}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SocketAddress {
    /// No address given (`0` or `NULL`), eg. `accept(3, 0, NULL)`.
    Null,
    Unix {
        family: String,
        path: UnixPath,
    },
    Unspec {
        family: String,
        data: String,
    },
    Inet {
        family: String,
        port: u16,
        addr: Ipv4Addr,
    },
    Netlink {
        family: String,
        pid: u32,
        groups: String,
    },
    /// Address family that isn't decoded; fields are kept as printed.
    Other {
        family: String,
        fields: Vec<String>,
    },
}

/// Address forms of `AF_UNIX` sockets, see unix(7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UnixPath {
    Unnamed,
    Pathname(String),
    Abstract(String),
}

impl SocketAddress {
    #[must_use]
    pub fn family(&self) -> Option<&str> {
        match self {
            SocketAddress::Null => None,
            SocketAddress::Unix { family, .. }
            | SocketAddress::Unspec { family, .. }
            | SocketAddress::Inet { family, .. }
            | SocketAddress::Netlink { family, .. }
            | SocketAddress::Other { family, .. } => Some(family),
        }
    }
}

/// Parses a sockaddr from the head of `tokens`.  Returns `None` when strace printed the structure's address instead
/// of its contents (the kernel didn't fill it in), along with the number of tokens consumed.
pub(crate) fn parse_sockaddr(
    tokens: &[String],
) -> Result<(Option<SocketAddress>, usize), CastError> {
    let Some(first) = tokens.first() else {
        return Err(CastError::structure(
            ArgumentKind::Sockaddr,
            tokens,
            "no tokens",
        ));
    };
    if first.starts_with("0x") {
        return Ok((None, 1));
    }
    if first == "0" || first == "NULL" {
        return Ok((Some(SocketAddress::Null), 1));
    }

    let consumed = take_braced(ArgumentKind::Sockaddr, tokens)?;
    let raw = &tokens[..consumed];
    let fields = unbrace(raw);
    let error = |reason: &str| CastError::structure(ArgumentKind::Sockaddr, raw, reason);

    let family = fields[0]
        .strip_prefix("sa_family=")
        .ok_or_else(|| error("first field must be sa_family"))?;
    if !(family.starts_with("AF_") || family.starts_with("PF_")) {
        return Err(error("unknown socket family"));
    }
    let family = String::from(family);
    let rest = &fields[1..];

    let addr = if family.ends_with("_FILE")
        || family.ends_with("_LOCAL")
        || family.ends_with("_UNIX")
    {
        let path = parse_unix_path(&rest.join(", ")).ok_or_else(|| error("bad unix path"))?;
        SocketAddress::Unix { family, path }
    } else if family.ends_with("_UNSPEC") {
        let data = rest.join(", ");
        let data = match data.strip_prefix("sa_data=") {
            Some(quoted) => unquote(quoted).ok_or_else(|| error("bad sa_data"))?,
            None if data.is_empty() => String::new(),
            None => return Err(error("expected sa_data")),
        };
        SocketAddress::Unspec { family, data }
    } else if family.ends_with("_INET") {
        let [port, addr] = rest else {
            return Err(error("expected sin_port and sin_addr"));
        };
        let port = port
            .strip_prefix("sin_port=htons(")
            .and_then(|p| p.strip_suffix(')'))
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| error("bad sin_port"))?;
        let addr = addr
            .strip_prefix("sin_addr=inet_addr(\"")
            .and_then(|a| a.strip_suffix("\")"))
            .ok_or_else(|| error("bad sin_addr"))?;
        let addr = Ipv4Addr::from_str(addr).map_err(|_| error("not a valid IPv4 address"))?;
        SocketAddress::Inet { family, port, addr }
    } else if family.ends_with("_NETLINK") {
        let [pid, groups] = rest else {
            return Err(error("expected pid and groups"));
        };
        let pid = pid
            .strip_prefix("nl_pid=")
            .or_else(|| pid.strip_prefix("pid="))
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| error("bad netlink pid"))?;
        let groups = groups
            .strip_prefix("nl_groups=")
            .or_else(|| groups.strip_prefix("groups="))
            .ok_or_else(|| error("bad netlink groups"))?;
        SocketAddress::Netlink {
            family,
            pid,
            groups: String::from(groups),
        }
    } else {
        SocketAddress::Other {
            family,
            fields: rest.to_vec(),
        }
    };

    Ok((Some(addr), consumed))
}

fn unbrace(raw: &[String]) -> Vec<String> {
    let mut fields = raw.to_vec();
    if let Some(first) = fields.first_mut()
        && let Some(stripped) = first.strip_prefix('{')
    {
        *first = String::from(stripped);
    }
    if let Some(last) = fields.last_mut()
        && let Some(stripped) = last.strip_suffix('}')
    {
        *last = String::from(stripped);
    }
    fields
}

fn unquote(s: &str) -> Option<String> {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(String::from)
}

fn parse_unix_path(field: &str) -> Option<UnixPath> {
    if field.is_empty() || field == "NULL" {
        return Some(UnixPath::Unnamed);
    }
    let value = field
        .strip_prefix("sun_path=")
        .or_else(|| field.strip_prefix("path="))?;
    match value.strip_prefix('@') {
        Some(abstract_name) => unquote(abstract_name).map(UnixPath::Abstract),
        None => unquote(value).map(UnixPath::Pathname),
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Null => write!(f, "NULL"),
            SocketAddress::Unix { family, path } => match path {
                UnixPath::Unnamed => write!(f, "{{sa_family={family}}}"),
                UnixPath::Pathname(p) => write!(f, "{{sa_family={family}, sun_path=\"{p}\"}}"),
                UnixPath::Abstract(p) => write!(f, "{{sa_family={family}, sun_path=@\"{p}\"}}"),
            },
            SocketAddress::Unspec { family, data } => {
                write!(f, "{{sa_family={family}, sa_data=\"{data}\"}}")
            }
            SocketAddress::Inet { family, port, addr } => write!(
                f,
                "{{sa_family={family}, sin_port=htons({port}), sin_addr=inet_addr(\"{addr}\")}}"
            ),
            SocketAddress::Netlink {
                family,
                pid,
                groups,
            } => write!(
                f,
                "{{sa_family={family}, nl_pid={pid}, nl_groups={groups}}}"
            ),
            SocketAddress::Other { family, fields } => {
                write!(f, "{{sa_family={family}")?;
                for field in fields {
                    write!(f, ", {field}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
