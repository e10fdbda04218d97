//! The device table and registry-fact reconciliation.
//!
//! The table is an append-ordered collection owned by the command driver.
//! Rows are never removed during a run; only the pnetid and the printer's
//! transient flag mutate after insertion.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{Device, Pnetid, Subsystem};

/// A pnetid fact decoded from a registry reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryFact {
    /// The pnetid being assigned.
    pub pnetid: Pnetid,
    /// Ethernet device name, if present.
    pub eth_name: Option<String>,
    /// InfiniBand device name, if present.
    pub ib_name: Option<String>,
    /// InfiniBand port, if present.
    pub ib_port: Option<u8>,
}

/// Append-ordered table of discovered devices.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
}

impl DeviceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a device row.
    ///
    /// Enforces the data-model invariant that InfiniBand rows carry a
    /// port number.
    pub fn insert(&mut self, device: Device) -> Result<()> {
        if device.subsystem == Subsystem::Infiniband && device.ib_port.is_none() {
            return Err(Error::Insert {
                name: device.name,
                reason: "infiniband device without port".to_string(),
            });
        }
        debug!("added device \"{}\" to device table", device.name);
        self.devices.push(device);
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterates rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Iterates rows mutably in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    /// First row matching the predicate.
    pub fn find(&self, predicate: impl FnMut(&&Device) -> bool) -> Option<&Device> {
        self.devices.iter().find(predicate)
    }

    /// Drops all rows.
    pub fn clear(&mut self) {
        debug!("clearing device table");
        self.devices.clear();
    }

    /// Applies a registry fact to all matching rows.
    ///
    /// Registry facts are authoritative and overwrite any pnetid set
    /// earlier, including values read from device-local configuration.
    /// Malformed facts (an InfiniBand name without a port, or no device
    /// name at all) are discarded without mutation. Returns the number of
    /// rows updated.
    pub fn apply(&mut self, fact: &RegistryFact) -> usize {
        let mut updated = 0;

        if let Some(eth_name) = fact.eth_name.as_deref() {
            updated += self.set_pnetid_for_eth(eth_name, &fact.pnetid);
        }

        if let Some(ib_name) = fact.ib_name.as_deref() {
            match fact.ib_port {
                Some(port) => {
                    updated += self.set_pnetid_for_ib(ib_name, port, &fact.pnetid);
                }
                None => {
                    warn!(
                        "discarding registry entry for pnetid \"{}\": \
                         infiniband name \"{}\" without port",
                        fact.pnetid, ib_name
                    );
                }
            }
        } else if fact.eth_name.is_none() {
            warn!(
                "discarding registry entry for pnetid \"{}\": no device name",
                fact.pnetid
            );
        }

        updated
    }

    /// Sets the pnetid on every network row whose name or lowest device
    /// matches. Matching via the lowest-device alias lets a bonded
    /// interface's pnetid propagate to its physical parent.
    fn set_pnetid_for_eth(&mut self, dev_name: &str, pnetid: &Pnetid) -> usize {
        let mut updated = 0;
        for device in &mut self.devices {
            if device.subsystem != Subsystem::Network {
                continue;
            }
            if device.name == dev_name || device.lowest.as_deref() == Some(dev_name) {
                device.pnetid = Some(pnetid.clone());
                debug!(
                    "set pnetid of net device \"{}\" to \"{}\"",
                    device.name, pnetid
                );
                updated += 1;
            }
        }
        updated
    }

    /// Sets the pnetid on every InfiniBand row with the given port whose
    /// name or parent matches.
    fn set_pnetid_for_ib(&mut self, dev_name: &str, dev_port: u8, pnetid: &Pnetid) -> usize {
        let mut updated = 0;
        for device in &mut self.devices {
            if device.subsystem != Subsystem::Infiniband {
                continue;
            }
            if device.ib_port == Some(dev_port)
                && (device.name == dev_name || device.parent.as_deref() == Some(dev_name))
            {
                device.pnetid = Some(pnetid.clone());
                debug!(
                    "set pnetid of ib device \"{}\" port {} to \"{}\"",
                    device.name, dev_port, pnetid
                );
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pnetid(s: &str) -> Pnetid {
        Pnetid::new(s).unwrap()
    }

    fn eth_fact(pnet: &str, eth: &str) -> RegistryFact {
        RegistryFact {
            pnetid: pnetid(pnet),
            eth_name: Some(eth.to_string()),
            ib_name: None,
            ib_port: None,
        }
    }

    fn ib_fact(pnet: &str, ib: &str, port: Option<u8>) -> RegistryFact {
        RegistryFact {
            pnetid: pnetid(pnet),
            eth_name: None,
            ib_name: Some(ib.to_string()),
            ib_port: port,
        }
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut table = DeviceTable::new();
        table.insert(Device::new(Subsystem::Network, "eth0")).unwrap();
        table.insert(Device::new(Subsystem::Network, "lo")).unwrap();
        let names: Vec<_> = table.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["eth0", "lo"]);
    }

    #[test]
    fn test_insert_rejects_ib_without_port() {
        let mut table = DeviceTable::new();
        let err = table
            .insert(Device::new(Subsystem::Infiniband, "mlx5_0"))
            .unwrap_err();
        assert_eq!(err.exit_code(), 6);
        assert!(table.is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut table = DeviceTable::new();
        table.insert(Device::new(Subsystem::Network, "lo")).unwrap();
        table.clear();
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_apply_eth_matches_name_and_lowest() {
        let mut table = DeviceTable::new();
        table.insert(Device::new(Subsystem::Network, "lo")).unwrap();
        let mut bond = Device::new(Subsystem::Network, "bond0");
        bond.lowest = Some("lo".to_string());
        table.insert(bond).unwrap();
        table.insert(Device::new(Subsystem::Network, "eth1")).unwrap();

        let updated = table.apply(&eth_fact("P1", "lo"));
        assert_eq!(updated, 2);
        let names: Vec<_> = table
            .iter()
            .filter(|d| d.pnetid.as_ref().map(Pnetid::as_str) == Some("P1"))
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, ["lo", "bond0"]);
        assert!(table.find(|d| d.name == "eth1").unwrap().pnetid.is_none());
    }

    #[test]
    fn test_apply_ib_matches_name_parent_and_port() {
        let mut table = DeviceTable::new();
        let mut port1 = Device::new(Subsystem::Infiniband, "mlx5_1");
        port1.ib_port = Some(1);
        let mut port2 = Device::new(Subsystem::Infiniband, "mlx5_1");
        port2.ib_port = Some(2);
        let mut by_parent = Device::new(Subsystem::Infiniband, "mlx5_9");
        by_parent.parent = Some("mlx5_1".to_string());
        by_parent.ib_port = Some(1);
        table.insert(port1).unwrap();
        table.insert(port2).unwrap();
        table.insert(by_parent).unwrap();

        let updated = table.apply(&ib_fact("P2", "mlx5_1", Some(1)));
        assert_eq!(updated, 2);
        assert!(table
            .find(|d| d.name == "mlx5_1" && d.ib_port == Some(2))
            .unwrap()
            .pnetid
            .is_none());
    }

    #[test]
    fn test_apply_ib_without_port_mutates_nothing() {
        let mut table = DeviceTable::new();
        let mut dev = Device::new(Subsystem::Infiniband, "mlx5_1");
        dev.ib_port = Some(1);
        table.insert(dev).unwrap();

        assert_eq!(table.apply(&ib_fact("P2", "mlx5_1", None)), 0);
        assert!(table.iter().all(|d| d.pnetid.is_none()));
    }

    #[test]
    fn test_apply_overwrites_local_config_value() {
        let mut table = DeviceTable::new();
        let mut dev = Device::new(Subsystem::Network, "encf500");
        dev.pnetid = Some(pnetid("FROMFW"));
        table.insert(dev).unwrap();

        table.apply(&eth_fact("FROMREG", "encf500"));
        assert_eq!(
            table.find(|d| d.name == "encf500").unwrap().pnetid,
            Some(pnetid("FROMREG"))
        );
    }

    #[test]
    fn test_apply_without_any_name_mutates_nothing() {
        let mut table = DeviceTable::new();
        table.insert(Device::new(Subsystem::Network, "lo")).unwrap();
        let fact = RegistryFact {
            pnetid: pnetid("P1"),
            eth_name: None,
            ib_name: None,
            ib_port: None,
        };
        assert_eq!(table.apply(&fact), 0);
    }
}
