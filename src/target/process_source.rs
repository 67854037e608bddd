use log::debug;
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;

use crate::target::net_table;

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A socket owned by a process. Unbound or unconnected ends are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Connection {
    pub protocol: Protocol,
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
}

impl Connection {
    pub fn new(protocol: Protocol, local_port: Option<u16>, remote_port: Option<u16>) -> Self {
        Self {
            protocol,
            local_port,
            remote_port,
        }
    }
}

/// A running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// Why the connections of a process could not be listed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("process {0} no longer exists")]
    NotFound(u32),

    #[error("access denied to process {0}")]
    AccessDenied(u32),

    #[error("{0}")]
    Other(String),
}

/// Read-only view of the operating system's processes and sockets.
pub trait ProcessSource: Send + Sync {
    /// All running processes, in a stable enumeration order.
    fn processes(&self) -> Vec<ProcessEntry>;

    /// Every socket owned by `pid`.
    fn connections(&self, pid: u32) -> Result<Vec<Connection>, ProcessError>;
}

/// Live process table from `sysinfo` plus the platform socket tables.
///
/// Processes are returned in ascending PID order so "first match" is
/// reproducible between runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessSource;

impl SystemProcessSource {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSource for SystemProcessSource {
    fn processes(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut processes: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
            })
            .collect();
        processes.sort_by_key(|p| p.pid);

        debug!("Enumerated {} processes", processes.len());
        processes
    }

    fn connections(&self, pid: u32) -> Result<Vec<Connection>, ProcessError> {
        net_table::connections_for(pid)
    }
}

/// Fixed process table for tests; counts how often it is enumerated.
#[cfg(test)]
#[derive(Default)]
pub struct StaticProcessSource {
    processes: Vec<ProcessEntry>,
    connections: std::collections::HashMap<u32, Result<Vec<Connection>, ProcessError>>,
    pub enumerations: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl StaticProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(mut self, pid: u32, name: &str) -> Self {
        self.processes.push(ProcessEntry {
            pid,
            name: name.to_string(),
        });
        self
    }

    pub fn connections_of(
        mut self,
        pid: u32,
        result: Result<Vec<Connection>, ProcessError>,
    ) -> Self {
        self.connections.insert(pid, result);
        self
    }

    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl ProcessSource for StaticProcessSource {
    fn processes(&self) -> Vec<ProcessEntry> {
        self.enumerations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.processes.clone()
    }

    fn connections(&self, pid: u32) -> Result<Vec<Connection>, ProcessError> {
        self.connections
            .get(&pid)
            .cloned()
            .unwrap_or(Err(ProcessError::NotFound(pid)))
    }
}
