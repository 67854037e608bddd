//! Per-process socket enumeration.
//!
//! Windows reads the IP Helper owner-PID tables (`GetExtendedTcpTable` /
//! `GetExtendedUdpTable`, IPv4 and IPv6). Linux maps the socket inodes in
//! `/proc/<pid>/fd` onto `/proc/net/{tcp,tcp6,udp,udp6}`.

use crate::target::process_source::{Connection, ProcessError, Protocol};

/// Every TCP and UDP socket owned by `pid`.
pub fn connections_for(pid: u32) -> Result<Vec<Connection>, ProcessError> {
    platform::connections_for(pid)
}

#[cfg(windows)]
mod platform {
    use super::*;
    use log::warn;

    const AF_INET: u32 = 2;
    const AF_INET6: u32 = 23;
    const TCP_TABLE_OWNER_PID_ALL: u32 = 5;
    const UDP_TABLE_OWNER_PID: u32 = 1;
    const NO_ERROR: u32 = 0;
    const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
    const ERROR_ACCESS_DENIED: u32 = 5;

    #[repr(C)]
    #[allow(dead_code)]
    #[derive(Clone, Copy)]
    struct MibTcpRowOwnerPid {
        state: u32,
        local_addr: u32,
        local_port: u32,
        remote_addr: u32,
        remote_port: u32,
        owning_pid: u32,
    }

    #[repr(C)]
    #[allow(dead_code)]
    #[derive(Clone, Copy)]
    struct MibUdpRowOwnerPid {
        local_addr: u32,
        local_port: u32,
        owning_pid: u32,
    }

    #[repr(C)]
    #[allow(dead_code)]
    #[derive(Clone, Copy)]
    struct MibTcp6RowOwnerPid {
        local_addr: [u8; 16],
        local_scope_id: u32,
        local_port: u32,
        remote_addr: [u8; 16],
        remote_scope_id: u32,
        remote_port: u32,
        state: u32,
        owning_pid: u32,
    }

    #[repr(C)]
    #[allow(dead_code)]
    #[derive(Clone, Copy)]
    struct MibUdp6RowOwnerPid {
        local_addr: [u8; 16],
        local_scope_id: u32,
        local_port: u32,
        owning_pid: u32,
    }

    #[link(name = "iphlpapi")]
    extern "system" {
        fn GetExtendedTcpTable(
            pTcpTable: *mut u8,
            pdwSize: *mut u32,
            bOrder: i32,
            ulAf: u32,
            TableClass: u32,
            Reserved: u32,
        ) -> u32;

        fn GetExtendedUdpTable(
            pUdpTable: *mut u8,
            pdwSize: *mut u32,
            bOrder: i32,
            ulAf: u32,
            TableClass: u32,
            Reserved: u32,
        ) -> u32;
    }

    /// Port fields hold a network-order u16 in their low bytes.
    fn port(raw: u32) -> Option<u16> {
        Some(u16::from_be(raw as u16)).filter(|p| *p > 0)
    }

    /// Calls a table function twice: once for the size, once for the data.
    fn fetch_table(name: &str, call: impl Fn(*mut u8, *mut u32) -> u32) -> Result<Vec<u8>, ProcessError> {
        let mut size: u32 = 0;
        let ret = call(std::ptr::null_mut(), &mut size);
        if ret == NO_ERROR {
            return Ok(Vec::new());
        }
        if ret != ERROR_INSUFFICIENT_BUFFER {
            return Err(table_error(name, ret));
        }

        // The table can grow between the two calls.
        for _ in 0..3 {
            let mut buf = vec![0u8; size as usize];
            match call(buf.as_mut_ptr(), &mut size) {
                NO_ERROR => return Ok(buf),
                ERROR_INSUFFICIENT_BUFFER => continue,
                ret => return Err(table_error(name, ret)),
            }
        }
        Err(ProcessError::Other(format!("{} kept growing", name)))
    }

    fn table_error(name: &str, code: u32) -> ProcessError {
        if code == ERROR_ACCESS_DENIED {
            ProcessError::AccessDenied(0)
        } else {
            warn!("{} failed with code {}", name, code);
            ProcessError::Other(format!("{} failed with code {}", name, code))
        }
    }

    /// Reads the rows that follow the leading `dwNumEntries` field.
    fn rows<T: Copy>(buf: &[u8]) -> Vec<T> {
        if buf.len() < 4 {
            return Vec::new();
        }
        let count = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let row_size = std::mem::size_of::<T>();

        (0..count)
            .map(|i| 4 + i * row_size)
            .take_while(|offset| offset + row_size <= buf.len())
            .map(|offset| unsafe { std::ptr::read_unaligned(buf.as_ptr().add(offset) as *const T) })
            .collect()
    }

    fn tcp_table(family: u32) -> Result<Vec<u8>, ProcessError> {
        fetch_table("GetExtendedTcpTable", |ptr, size| unsafe {
            GetExtendedTcpTable(ptr, size, 0, family, TCP_TABLE_OWNER_PID_ALL, 0)
        })
    }

    fn udp_table(family: u32) -> Result<Vec<u8>, ProcessError> {
        fetch_table("GetExtendedUdpTable", |ptr, size| unsafe {
            GetExtendedUdpTable(ptr, size, 0, family, UDP_TABLE_OWNER_PID, 0)
        })
    }

    pub fn connections_for(pid: u32) -> Result<Vec<Connection>, ProcessError> {
        let with_pid = |e: ProcessError| match e {
            ProcessError::AccessDenied(_) => ProcessError::AccessDenied(pid),
            other => other,
        };
        let mut connections = Vec::new();

        for row in rows::<MibTcpRowOwnerPid>(&tcp_table(AF_INET).map_err(with_pid)?) {
            if row.owning_pid == pid {
                connections.push(Connection::new(Protocol::Tcp, port(row.local_port), port(row.remote_port)));
            }
        }
        for row in rows::<MibTcp6RowOwnerPid>(&tcp_table(AF_INET6).map_err(with_pid)?) {
            if row.owning_pid == pid {
                connections.push(Connection::new(Protocol::Tcp, port(row.local_port), port(row.remote_port)));
            }
        }
        for row in rows::<MibUdpRowOwnerPid>(&udp_table(AF_INET).map_err(with_pid)?) {
            if row.owning_pid == pid {
                connections.push(Connection::new(Protocol::Udp, port(row.local_port), None));
            }
        }
        for row in rows::<MibUdp6RowOwnerPid>(&udp_table(AF_INET6).map_err(with_pid)?) {
            if row.owning_pid == pid {
                connections.push(Connection::new(Protocol::Udp, port(row.local_port), None));
            }
        }

        Ok(connections)
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::io::ErrorKind;

    const TABLES: [(&str, Protocol); 4] = [
        ("/proc/net/tcp", Protocol::Tcp),
        ("/proc/net/tcp6", Protocol::Tcp),
        ("/proc/net/udp", Protocol::Udp),
        ("/proc/net/udp6", Protocol::Udp),
    ];

    fn socket_inodes(pid: u32) -> Result<HashSet<u64>, ProcessError> {
        let entries = fs::read_dir(format!("/proc/{}/fd", pid)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProcessError::NotFound(pid),
            ErrorKind::PermissionDenied => ProcessError::AccessDenied(pid),
            _ => ProcessError::Other(e.to_string()),
        })?;

        Ok(entries
            .flatten()
            .filter_map(|entry| fs::read_link(entry.path()).ok())
            .filter_map(|link| super::parse_socket_link(&link.to_string_lossy()))
            .collect())
    }

    pub fn connections_for(pid: u32) -> Result<Vec<Connection>, ProcessError> {
        let inodes = socket_inodes(pid)?;
        if inodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut connections = Vec::new();
        for (path, protocol) in TABLES {
            // IPv6 tables are missing on hosts without IPv6.
            let Ok(table) = fs::read_to_string(path) else {
                continue;
            };
            for entry in table.lines().skip(1).filter_map(super::parse_proc_net_line) {
                if inodes.contains(&entry.inode) {
                    connections.push(Connection::new(protocol, entry.local_port, entry.remote_port));
                }
            }
        }
        Ok(connections)
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
mod platform {
    use super::*;

    pub fn connections_for(_pid: u32) -> Result<Vec<Connection>, ProcessError> {
        Err(ProcessError::Other(
            "connection enumeration is not supported on this platform".into(),
        ))
    }
}

/// One row of `/proc/net/{tcp,udp}[6]`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcNetEntry {
    local_port: Option<u16>,
    remote_port: Option<u16>,
    inode: u64,
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_hex_port(address: &str) -> Option<u16> {
    let (_, port) = address.rsplit_once(':')?;
    u16::from_str_radix(port, 16).ok().filter(|p| *p > 0)
}

/// `sl local_address rem_address st tx:rx tr:when retrnsmt uid timeout inode ...`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_net_line(line: &str) -> Option<ProcNetEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    Some(ProcNetEntry {
        local_port: parse_hex_port(fields[1]),
        remote_port: parse_hex_port(fields[2]),
        inode: fields[9].parse().ok()?,
    })
}

/// `socket:[12345]` -> 12345
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_socket_link(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}
