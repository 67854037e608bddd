//! Process name to port set resolution with a short-lived cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Result, ThrottlerError};
use crate::network::core::clock::{Clock, SystemClock};
use crate::target::process_source::{ProcessEntry, ProcessSource};

/// How long a resolved target is reused before the OS is queried again.
pub const CACHE_TTL: Duration = Duration::from_secs(5);

/// The process being shaped and the ports it was using at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub process_id: u32,
    pub process_name: String,
    /// Local and remote ports of every socket, ascending
    pub ports: BTreeSet<u16>,
    pub resolved_at: Instant,
}

/// Resolves a case-insensitive name substring to a [`TargetDescriptor`].
pub struct TargetResolver<S: ProcessSource> {
    source: S,
    cache: Mutex<HashMap<String, TargetDescriptor>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: ProcessSource> TargetResolver<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttl(source, CACHE_TTL, Arc::new(SystemClock))
    }

    pub fn with_ttl(source: S, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the first process whose name contains `pattern`, reusing a
    /// cached result younger than the cache lifetime.
    ///
    /// # Arguments
    ///
    /// * `pattern` - Case-insensitive substring of the process name
    ///
    /// # Returns
    ///
    /// * `Ok(TargetDescriptor)` - PID, name and the local ports in use; the
    ///   port set is empty when discovery failed
    /// * `Err(ThrottlerError::TargetNotFound)` - If no process matches
    pub fn resolve(&self, pattern: &str) -> Result<TargetDescriptor> {
        let key = cache_key(pattern)?;
        let now = self.clock.now();

        {
            let cache = self
                .cache
                .lock()
                .map_err(|_| ThrottlerError::lock_poisoned("target cache"))?;
            if let Some(cached) = cache.get(&key) {
                if now.saturating_duration_since(cached.resolved_at) < self.ttl {
                    debug!("Using cached target for '{}' (PID {})", pattern, cached.process_id);
                    return Ok(cached.clone());
                }
            }
        }

        self.refresh(pattern)
    }

    /// Resolves `pattern` against the live process table, replacing any
    /// cached entry.
    pub fn refresh(&self, pattern: &str) -> Result<TargetDescriptor> {
        let key = cache_key(pattern)?;

        let process = self
            .source
            .processes()
            .into_iter()
            .find(|p| p.name.to_lowercase().contains(&key))
            .ok_or_else(|| ThrottlerError::TargetNotFound(pattern.to_string()))?;
        info!("Found {} process PID={}", process.name, process.pid);

        let ports = match self.discover_ports(process.pid) {
            Ok(ports) => ports,
            Err(e) => {
                warn!("{}; falling back to the port range filter", e);
                BTreeSet::new()
            }
        };
        info!("{} is using ports: {:?}", process.name, ports);

        let descriptor = TargetDescriptor {
            process_id: process.pid,
            process_name: process.name,
            ports,
            resolved_at: self.clock.now(),
        };

        self.cache
            .lock()
            .map_err(|_| ThrottlerError::lock_poisoned("target cache"))?
            .insert(key, descriptor.clone());

        Ok(descriptor)
    }

    /// Every process whose name contains `pattern`, for diagnostics.
    pub fn find_all(&self, pattern: &str) -> Result<Vec<ProcessEntry>> {
        let key = cache_key(pattern)?;
        Ok(self
            .source
            .processes()
            .into_iter()
            .filter(|p| p.name.to_lowercase().contains(&key))
            .collect())
    }

    /// Union of local and remote ports over the sockets of `pid`.
    pub fn discover_ports(&self, pid: u32) -> Result<BTreeSet<u16>> {
        let connections = self
            .source
            .connections(pid)
            .map_err(|e| ThrottlerError::PortDiscoveryFailed {
                pid,
                reason: e.to_string(),
            })?;

        Ok(connections
            .iter()
            .flat_map(|c| [c.local_port, c.remote_port])
            .flatten()
            .collect())
    }

    /// Drops every cached descriptor.
    pub fn invalidate(&self) {
        match self.cache.lock() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

fn cache_key(pattern: &str) -> Result<String> {
    let key = pattern.trim().to_lowercase();
    if key.is_empty() {
        return Err(ThrottlerError::InvalidArgument(
            "process name pattern must not be empty".into(),
        ));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::core::clock::ManualClock;
    use crate::target::process_source::{
        Connection, ProcessError, Protocol, StaticProcessSource,
    };

    fn tcp(local: u16, remote: Option<u16>) -> Connection {
        Connection::new(Protocol::Tcp, Some(local), remote)
    }

    fn source() -> StaticProcessSource {
        StaticProcessSource::new()
            .process(10, "explorer.exe")
            .process(42, "RobloxPlayerBeta.exe")
            .process(77, "roblox_crashhandler.exe")
            .connections_of(
                42,
                Ok(vec![
                    tcp(50000, Some(443)),
                    tcp(50001, Some(443)),
                    Connection::new(Protocol::Udp, Some(60000), None),
                ]),
            )
            .connections_of(77, Err(ProcessError::AccessDenied(77)))
    }

    fn resolver(source: StaticProcessSource) -> (TargetResolver<StaticProcessSource>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TargetResolver::with_ttl(source, CACHE_TTL, clock.clone()), clock)
    }

    #[test]
    fn test_resolve_first_case_insensitive_match() {
        let (resolver, _clock) = resolver(source());

        let target = resolver.resolve("roblox").unwrap();

        assert_eq!(target.process_id, 42);
        assert_eq!(target.process_name, "RobloxPlayerBeta.exe");
        assert_eq!(target.ports, BTreeSet::from([443, 50000, 50001, 60000]));
    }

    #[test]
    fn test_resolve_missing_process() {
        let (resolver, _clock) = resolver(source());

        let err = resolver.resolve("steam").unwrap_err();
        assert!(matches!(err, ThrottlerError::TargetNotFound(ref p) if p == "steam"));
    }

    #[test]
    fn test_port_discovery_failure_degrades_to_empty_set() {
        let (resolver, _clock) = resolver(source());

        let target = resolver.resolve("crashhandler").unwrap();
        assert_eq!(target.process_id, 77);
        assert!(target.ports.is_empty());

        assert!(matches!(
            resolver.discover_ports(77),
            Err(ThrottlerError::PortDiscoveryFailed { pid: 77, .. })
        ));
    }

    #[test]
    fn test_cache_is_reused_within_ttl() {
        let (resolver, clock) = resolver(source());

        resolver.resolve("ROBLOX").unwrap();
        clock.advance(Duration::from_secs(4));
        resolver.resolve("roblox").unwrap();
        assert_eq!(resolver.source().enumeration_count(), 1);

        clock.advance(Duration::from_secs(1));
        resolver.resolve("roblox").unwrap();
        assert_eq!(resolver.source().enumeration_count(), 2);
    }

    #[test]
    fn test_refresh_and_invalidate_bypass_cache() {
        let (resolver, _clock) = resolver(source());

        resolver.resolve("roblox").unwrap();
        resolver.refresh("roblox").unwrap();
        assert_eq!(resolver.source().enumeration_count(), 2);

        resolver.invalidate();
        resolver.resolve("roblox").unwrap();
        assert_eq!(resolver.source().enumeration_count(), 3);
    }

    #[test]
    fn test_find_all_lists_every_match() {
        let (resolver, _clock) = resolver(source());

        let pids: Vec<u32> = resolver
            .find_all("roblox")
            .unwrap()
            .into_iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(pids, vec![42, 77]);
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        let (resolver, _clock) = resolver(source());
        assert!(matches!(
            resolver.resolve("  "),
            Err(ThrottlerError::InvalidArgument(_))
        ));
    }
}
