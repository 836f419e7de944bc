// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    io::Write as _,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use tempfile::NamedTempFile;
use traceparse::{
    catalog::{DefinitionCatalog, SyscallCatalog},
    config::ParserConfig,
    errors::{CastError, TraceError},
    sys_trace::{
        Diagnostic, Trace, TracingUtility,
        args::{
            ArgumentValue, FileDescriptor, MissingValue, PollFd, SocketAddress, UnixPath,
        },
        strace::{options::TimestampMode, tokenizer::CallKind},
        trace::{ReturnValue, SyscallReturn, TimestampValue},
    },
};

fn test_data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("test_data")
        .join(name)
}

fn catalog() -> Result<Arc<dyn DefinitionCatalog>> {
    Ok(Arc::new(SyscallCatalog::load(&test_data(
        "syscall_definitions.toml",
    ))?))
}

fn parse_fixture(name: &str) -> Result<Trace> {
    Ok(Trace::open(&test_data(name), catalog()?)?)
}

/// Writes `contents` to a temporary trace file and parses it.
fn parse_text(contents: &str) -> Result<Trace, TraceError> {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write trace");
    Trace::open(file.path(), catalog().expect("catalog fixture"))
}

fn strs(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| String::from(*v)).collect()
}

#[test]
fn open_close() -> Result<()> {
    let trace = parse_fixture("openclose.strace")?;
    assert_eq!(trace.tracing_utility(), TracingUtility::Strace);
    assert_eq!(trace.options().timestamp_mode, TimestampMode::None);
    assert!(!trace.options().has_inst_pointer);
    assert!(!trace.options().has_elapsed_time);
    assert_eq!(trace.len(), 10);

    let names: Vec<&str> = trace.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "execve",
            "open",
            "fstat",
            "open",
            "open",
            "read",
            "close",
            "close",
            "fstat",
            "exit_group"
        ]
    );

    let execve = &trace.records()[0];
    assert_eq!(execve.args[0], ArgumentValue::Filepath(String::from("./syscalls")));
    assert_eq!(execve.args[0].to_string(), "\"./syscalls\"");

    let open = &trace.records()[1];
    assert_eq!(
        open.args,
        vec![
            ArgumentValue::Filepath(String::from("test.txt")),
            ArgumentValue::flags(&["O_RDONLY"]),
            ArgumentValue::flags(&["0"]),
        ]
    );
    assert_eq!(
        open.ret,
        Some(SyscallReturn {
            value: ReturnValue::Int(3),
            error_label: None,
        })
    );

    let ArgumentValue::Stat(stat) = &trace.records()[2].args[1] else {
        panic!("expected Stat; was {:?}", trace.records()[2].args[1]);
    };
    assert_eq!(stat.fields.len(), 15);
    assert_eq!(stat.get("st_dev"), Some("makedev(8, 1)"));
    assert_eq!(stat.get("st_size"), Some("13"));

    let missing = &trace.records()[3];
    assert_eq!(
        missing.ret,
        Some(SyscallReturn {
            value: ReturnValue::Int(-1),
            error_label: Some(String::from("ENOENT")),
        })
    );
    assert!(!missing.is_successful());
    let ArgumentValue::MissingValue(MissingValue { expected, given }) = &missing.args[2] else {
        panic!("expected MissingValue; was {:?}", missing.args[2]);
    };
    assert_eq!(expected.name, "mode");
    assert_eq!(*given, None);

    assert_eq!(
        trace.records()[4].args[2],
        ArgumentValue::Flags(strs(&["S_IRUSR", "S_IWUSR", "S_IRGRP", "S_IROTH"]))
    );

    let read = &trace.records()[5];
    assert_eq!(read.args.len(), 3);
    assert_eq!(
        read.args[1],
        ArgumentValue::unimplemented("\"hello, world\\n\"")
    );
    assert_eq!(read.args[2], ArgumentValue::Hex(String::from("4096")));

    let bad_fstat = &trace.records()[8];
    assert_eq!(
        bad_fstat.args[0],
        ArgumentValue::FileDescriptor(FileDescriptor::Number(5))
    );
    let ArgumentValue::MissingValue(MissingValue { given, .. }) = &bad_fstat.args[1] else {
        panic!("expected MissingValue; was {:?}", bad_fstat.args[1]);
    };
    assert_eq!(given.as_deref(), Some("0xbfb99fe0"));
    assert_eq!(
        bad_fstat.ret.as_ref().and_then(|r| r.error_label.as_deref()),
        Some("EBADF")
    );

    let exit = &trace.records()[9];
    assert_eq!(
        exit.ret.as_ref().map(|r| &r.value),
        Some(&ReturnValue::NoReturn)
    );
    Ok(())
}

#[test]
fn sockets() -> Result<()> {
    let trace = parse_fixture("socket.strace")?;
    assert_eq!(trace.options().timestamp_mode, TimestampMode::TimeOfDayMicros);
    assert!(trace.options().has_elapsed_time);
    assert_eq!(trace.len(), 12);

    let socket = &trace.records()[1];
    assert_eq!(
        socket.args,
        vec![
            ArgumentValue::flags(&["PF_INET"]),
            ArgumentValue::flags(&["SOCK_STREAM"]),
            ArgumentValue::flags(&["IPPROTO_TCP"]),
        ]
    );
    assert_eq!(socket.elapsed_time, Some(Duration::from_micros(40)));

    assert_eq!(
        trace.records()[2].args[1],
        ArgumentValue::Sockaddr(SocketAddress::Inet {
            family: String::from("AF_INET"),
            port: 25588,
            addr: Ipv4Addr::LOCALHOST,
        })
    );
    assert_eq!(trace.records()[2].args[2], ArgumentValue::Int(16));

    let connect = &trace.records()[5];
    assert_eq!(connect.pid, 9288);
    assert_eq!(
        connect.args[1],
        ArgumentValue::Sockaddr(SocketAddress::Unix {
            family: String::from("AF_FILE"),
            path: UnixPath::Pathname(String::from("/tmp/sock")),
        })
    );

    // the accept that was interrupted by pid 9288 is reported where it completed
    let accept = &trace.records()[6];
    assert_eq!(accept.name, "accept");
    assert_eq!(accept.kind, CallKind::Resumed);
    assert_eq!(
        accept.args,
        vec![
            ArgumentValue::FileDescriptor(FileDescriptor::Number(3)),
            ArgumentValue::Sockaddr(SocketAddress::Inet {
                family: String::from("AF_INET"),
                port: 42572,
                addr: Ipv4Addr::LOCALHOST,
            }),
            ArgumentValue::Int(16),
        ]
    );
    assert_eq!(
        accept.ret,
        Some(SyscallReturn {
            value: ReturnValue::Int(5),
            error_label: None,
        })
    );
    assert_eq!(
        accept.timestamp.as_ref().map(|t| t.raw.as_str()),
        Some("15:32:16.191300")
    );
    assert_eq!(accept.elapsed_time, Some(Duration::from_micros(700)));

    let poll = &trace.records()[7];
    assert_eq!(
        poll.args[0],
        ArgumentValue::PollFdList(vec![
            PollFd {
                fd: 5,
                events: String::from("POLLIN"),
                revents: Some(String::from("POLLIN")),
            },
            PollFd {
                fd: 3,
                events: String::from("POLLIN"),
                revents: None,
            },
        ])
    );
    assert_eq!(poll.args[1], ArgumentValue::Int(2));
    assert_eq!(poll.args.len(), 3);

    assert_eq!(
        trace.records()[8].args[1],
        ArgumentValue::flags(&["SHUT_RDWR"])
    );

    let pids: Vec<u32> = trace.records()[10..].iter().map(|r| r.pid).collect();
    assert_eq!(pids, vec![9288, 9287]);
    Ok(())
}

#[test]
fn all_columns() -> Result<()> {
    let trace = parse_fixture("timing.strace")?;
    let options = trace.options();
    assert!(options.has_inst_pointer);
    assert_eq!(options.timestamp_mode, TimestampMode::Epoch);
    assert!(options.has_elapsed_time);

    let open = &trace.records()[1];
    assert_eq!(open.inst_pointer.as_deref(), Some("b7782424"));
    let Some(TimestampValue::Epoch(instant)) = open.timestamp.as_ref().map(|t| t.value) else {
        panic!("expected epoch timestamp; was {:?}", open.timestamp);
    };
    assert_eq!(instant.unix_timestamp(), 1_716_214_232);
    assert_eq!(
        open.args[2],
        ArgumentValue::Flags(strs(&[
            "S_IRUSR", "S_IWUSR", "S_IRGRP", "S_IWGRP", "S_IROTH"
        ]))
    );

    // found in the catalog as `llseek`
    let llseek = &trace.records()[2];
    assert_eq!(llseek.name, "_llseek");
    assert_eq!(
        llseek.args,
        vec![
            ArgumentValue::FileDescriptor(FileDescriptor::Number(3)),
            ArgumentValue::Int(0),
            ArgumentValue::Int(0),
            ArgumentValue::flags(&["SEEK_CUR"]),
        ]
    );

    // known but unmodeled; every token kept
    let clone = &trace.records()[3];
    assert_eq!(clone.args.len(), 3);
    assert!(
        clone
            .args
            .iter()
            .all(|a| matches!(a, ArgumentValue::Unimplemented(_)))
    );

    let exit = &trace.records()[5];
    assert_eq!(exit.inst_pointer.as_deref(), Some("????????"));
    assert_eq!(exit.elapsed_time, None);
    Ok(())
}

#[test]
fn diagnostics() -> Result<()> {
    let trace = parse_fixture("openclose.strace")?;
    let unmodeled: Vec<(&str, &str)> = trace
        .diagnostics()
        .iter()
        .map(|d| {
            let Diagnostic::UnmodeledParameter {
                syscall, parameter, ..
            } = d
            else {
                panic!("expected UnmodeledParameter; was {d:?}");
            };
            (syscall.as_str(), parameter.as_str())
        })
        .collect();
    assert_eq!(
        unmodeled,
        vec![("execve", "argv"), ("execve", "envp"), ("read", "buf")]
    );

    let trace = parse_text("100 getpid() = 100\n")?;
    assert_eq!(
        trace.diagnostics(),
        [Diagnostic::UnknownSyscall {
            name: String::from("getpid"),
            line_number: 1,
        }]
    );
    Ok(())
}

#[test]
fn token_accounting() -> Result<()> {
    // every token of a line lands in exactly one argument, so rendering reproduces the argument text
    let trace = parse_text(
        "100 open(\"a, b.txt\", O_RDONLY|O_CLOEXEC, 0) = 3\n\
         100 close(3, 4, 5) = 0\n\
         100 clone(child_stack=NULL, flags=SIGCHLD) = 101\n",
    )?;
    let rendered: Vec<String> = trace.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec![
            "100 open(\"a, b.txt\", O_RDONLY|O_CLOEXEC, 0) = 3",
            "100 close(3, 4, 5) = 0",
            "100 clone(child_stack=NULL, flags=SIGCHLD) = 101",
        ]
    );
    assert_eq!(
        trace.records()[1].args[1..],
        [
            ArgumentValue::unimplemented("4"),
            ArgumentValue::unimplemented("5")
        ]
    );
    Ok(())
}

#[test]
fn null_stat_buffer() -> Result<()> {
    let trace = parse_text("100 fstat(3, NULL) = -1 EFAULT (Bad address)\n")?;
    let fstat = &trace.records()[0];
    let ArgumentValue::MissingValue(MissingValue { expected, given }) = &fstat.args[1] else {
        panic!("expected MissingValue; was {:?}", fstat.args[1]);
    };
    assert_eq!(expected.name, "statbuf");
    assert_eq!(given.as_deref(), Some("NULL"));
    assert_eq!(
        fstat.ret.as_ref().and_then(|r| r.error_label.as_deref()),
        Some("EFAULT")
    );
    Ok(())
}

#[test]
fn relative_timestamps() -> Result<()> {
    let trace = parse_text("100 0.000000 close(3) = 0\n100 0.000539 close(4) = 0\n")?;
    assert_eq!(trace.options().timestamp_mode, TimestampMode::Relative);
    assert_eq!(
        trace.records()[1].timestamp.as_ref().map(|t| t.value),
        Some(TimestampValue::Relative(Duration::from_micros(539)))
    );
    Ok(())
}

#[test]
fn configured_epoch_threshold() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "100 1371472360.671434 close(3) = 0")?;

    let trace = Trace::open(file.path(), catalog()?)?;
    assert_eq!(trace.options().timestamp_mode, TimestampMode::Relative);

    let config = ParserConfig {
        epoch_threshold: 1_000_000_000,
        ..ParserConfig::default()
    };
    let trace = Trace::open_with_config(file.path(), catalog()?, &config)?;
    assert_eq!(trace.options().timestamp_mode, TimestampMode::Epoch);
    Ok(())
}

#[test]
fn never_resumed() -> Result<()> {
    let trace = parse_text(
        "100 read(3, <unfinished ...>\n\
         200 close(4) = 0\n\
         100 <... read resumed> \"ab\", <unfinished ...>) = ?\n\
         200 exit_group(0) = ?\n\
         100 +++ killed by SIGKILL +++\n",
    )?;
    assert_eq!(trace.len(), 3);
    let read = &trace.records()[0];
    assert_eq!(read.kind, CallKind::Unfinished);
    assert_eq!(read.ret, None);
    assert!(!read.is_successful());
    assert_eq!(
        read.args,
        vec![
            ArgumentValue::FileDescriptor(FileDescriptor::Number(3)),
            ArgumentValue::unimplemented("\"ab\""),
        ]
    );
    assert_eq!(read.to_string(), "100 read(3, \"ab\" <unfinished ...>");
    Ok(())
}

#[test]
fn fatal_errors() {
    let result = parse_text("100 close(3) = 0\n100 <... accept resumed> NULL, NULL) = 4\n");
    assert!(matches!(result, Err(TraceError::DanglingResume { pid: 100, .. })));

    let result = parse_text(
        "100 close(3) = 0\n100 bind(3, {sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr(\"1.2.3\")}, 16) = 0\n",
    );
    let Err(TraceError::Cast {
        source: CastError::StructureFormat { reason, .. },
        ..
    }) = &result
    else {
        panic!("expected StructureFormat; was {result:?}");
    };
    assert_eq!(reason, "not a valid IPv4 address");

    let result = parse_text("100 close(3) = 0\n100 close(3) = -1 eperm\n");
    assert!(matches!(result, Err(TraceError::Format { .. })));

    // strace run without -f
    let result = parse_text("close(3) = 0\n");
    assert!(matches!(result, Err(TraceError::Format { .. })));

    // strace run without -v
    let result = parse_text(
        "100 execve(\"./a\", [\"./a\"], [/* 39 vars */]) = 0\n",
    );
    assert!(matches!(result, Err(TraceError::Format { .. })));
}

#[test]
fn reparse_is_identical() -> Result<()> {
    let first = parse_fixture("socket.strace")?;
    let second = parse_fixture("socket.strace")?;
    assert_eq!(first.records(), second.records());
    assert_eq!(first.diagnostics(), second.diagnostics());
    Ok(())
}
