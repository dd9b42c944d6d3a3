use crate::domain::{DeployError, HostSpec, Instance, PortEntry};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use tracing::debug;

/// Tells whether a host port can be bound right now.
pub type PortProbe = Box<dyn Fn(u16) -> bool + Send + Sync>;

/// Default range of automatically assigned host ports.
pub const DEFAULT_PORT_RANGE: Range<u16> = 8100..9000;

/// Hands out host ports from a range, never twice.
pub struct PortAllocator {
    range: Range<u16>,
    claimed: BTreeSet<u16>,
    probe: PortProbe,
}

impl fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .field("claimed", &self.claimed)
            .finish()
    }
}

impl PortAllocator {
    pub fn new(range: Range<u16>, probe: PortProbe) -> Self {
        Self {
            range,
            claimed: BTreeSet::new(),
            probe,
        }
    }

    /// Mark ports held by instances that stay deployed.
    pub fn with_claimed(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.claimed.extend(ports);
        self
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed.contains(&port)
    }

    /// Claim a port requested explicitly; a collision is fatal.
    pub fn claim_explicit(&mut self, port: u16) -> Result<(), DeployError> {
        if !self.claimed.insert(port) {
            return Err(DeployError::PortConflict(port));
        }
        Ok(())
    }

    /// Take back a port used before, without probing: its previous owner is
    /// removed before the new container starts.
    pub fn reclaim(&mut self, port: u16) -> bool {
        self.range.contains(&port) && self.claimed.insert(port)
    }

    pub fn allocate(&mut self) -> Result<u16, DeployError> {
        for port in self.range.clone() {
            if self.claimed.contains(&port) || !(self.probe)(port) {
                continue;
            }
            self.claimed.insert(port);
            return Ok(port);
        }
        Err(DeployError::PortsExhausted {
            start: self.range.start,
            end: self.range.end,
        })
    }
}

/// Port numbers previously assigned, keyed by `(label, node, port name)`.
pub type PortHistory = BTreeMap<(String, String, String), u16>;

pub fn port_history<'a>(instances: impl IntoIterator<Item = &'a Instance>) -> PortHistory {
    let mut history = PortHistory::new();
    for instance in instances {
        let nodes = std::iter::once(("", &instance.port_list)).chain(
            instance
                .providers
                .iter()
                .map(|p| (p.name.as_str(), &p.port_list)),
        );
        for (node, ports) in nodes {
            for port in ports {
                if let (HostSpec::Auto, Some(used)) = (port.host, port.host_use) {
                    history.insert(
                        (instance.label.clone(), node.to_string(), port.name.clone()),
                        used,
                    );
                }
            }
        }
    }
    history
}

/// Assign `host_use` on every port of the batch: explicit ports first, then
/// automatic ones.
pub fn assign_ports(
    allocator: &mut PortAllocator,
    instances: &mut [Instance],
    history: &PortHistory,
) -> Result<(), DeployError> {
    for instance in instances.iter() {
        for port in instance.explicit_ports() {
            allocator.claim_explicit(port)?;
        }
    }

    for instance in instances.iter_mut() {
        let label = instance.label.clone();
        assign_node(allocator, &label, "", &mut instance.port_list, history)?;
        for provider in &mut instance.providers {
            assign_node(allocator, &label, &provider.name, &mut provider.port_list, history)?;
        }
    }
    Ok(())
}

fn assign_node(
    allocator: &mut PortAllocator,
    label: &str,
    node: &str,
    ports: &mut [PortEntry],
    history: &PortHistory,
) -> Result<(), DeployError> {
    for port in ports {
        let host = match port.host {
            HostSpec::Fixed(host) => host,
            HostSpec::Auto => {
                let key = (label.to_string(), node.to_string(), port.name.clone());
                match history.get(&key) {
                    Some(&previous) if allocator.reclaim(previous) => previous,
                    _ => allocator.allocate()?,
                }
            }
        };
        debug!("{label}: port {}/{} -> {host}", node, port.name);
        port.host_use = Some(host);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PortDecl;
    use proptest::prelude::*;

    fn always() -> PortProbe {
        Box::new(|_| true)
    }

    fn instance(label: &str, ports: &[(&str, HostSpec)]) -> Instance {
        Instance {
            label: label.into(),
            label_id: label.into(),
            port_list: ports
                .iter()
                .map(|(name, host)| {
                    PortEntry::from_decl(
                        name,
                        &PortDecl {
                            container: 80,
                            host: *host,
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_allocate_skips_claimed_and_busy_ports() {
        let mut allocator =
            PortAllocator::new(8100..8110, Box::new(|port| port != 8101)).with_claimed([8100]);
        assert_eq!(allocator.allocate().unwrap(), 8102);
        assert_eq!(allocator.allocate().unwrap(), 8103);
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let mut allocator = PortAllocator::new(8100..8102, always());
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        assert_eq!(
            allocator.allocate().unwrap_err(),
            DeployError::PortsExhausted {
                start: 8100,
                end: 8102
            }
        );
    }

    #[test]
    fn test_explicit_conflict_is_fatal() {
        let mut allocator = PortAllocator::new(8100..8110, always()).with_claimed([9001]);
        assert_eq!(
            allocator.claim_explicit(9001).unwrap_err(),
            DeployError::PortConflict(9001)
        );
    }

    #[test]
    fn test_assign_prefers_previous_port() {
        let mut previous = instance("blog", &[("web", HostSpec::Auto)]);
        previous.port_list[0].host_use = Some(8105);
        let history = port_history([&previous]);

        let mut batch = vec![
            instance("blog", &[("web", HostSpec::Auto)]),
            instance("wiki", &[("web", HostSpec::Auto), ("smtp", HostSpec::Fixed(2525))]),
        ];
        let mut allocator = PortAllocator::new(8100..8110, always());
        assign_ports(&mut allocator, &mut batch, &history).unwrap();

        assert_eq!(batch[0].port_list[0].host_use, Some(8105));
        let wiki: Vec<Option<u16>> = batch[1].port_list.iter().map(|p| p.host_use).collect();
        assert_eq!(wiki, [Some(8100), Some(2525)]);
    }

    proptest! {
        #[test]
        fn prop_ports_are_unique(count in 1usize..40, busy in proptest::collection::btree_set(8100u16..8140, 0..10)) {
            let mut allocator = PortAllocator::new(8100..8140, Box::new(move |port| !busy.contains(&port)));
            let mut seen = BTreeSet::new();
            for _ in 0..count {
                match allocator.allocate() {
                    Ok(port) => prop_assert!(seen.insert(port)),
                    Err(err) => {
                        prop_assert!(matches!(err, DeployError::PortsExhausted { .. }), "expected PortsExhausted");
                        break;
                    }
                }
            }
        }
    }
}
