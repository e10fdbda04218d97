//! Device discovery: builds the device table from a sysfs tree.
//!
//! Network devices contribute one row each, with their `lower_*` chain
//! resolved to the terminal device. InfiniBand devices contribute one row
//! per port. PCI devices bound to the `ism` driver contribute one ISM row.
//! Any per-phase failure aborts the whole scan; the caller discards the
//! partial table.

use std::collections::HashSet;

use tracing::debug;

use crate::error::Result;
use crate::sysfs::{SysDevice, Sysfs};
use crate::table::DeviceTable;
use crate::types::{Device, Subsystem};
use crate::util_string;

/// Attribute-name prefix linking a virtual device to its lower device.
const LOWER_PREFIX: &str = "lower_";

/// ISM adapters identify through their PCI driver name.
const ISM_DRIVER: &str = "ism";

/// Scans all supported subsystems and fills the device table.
pub fn scan_devices(sysfs: &Sysfs, table: &mut DeviceTable) -> Result<()> {
    debug!("scanning devices in {}", sysfs.root().display());
    scan_network(sysfs, table)?;
    scan_infiniband(sysfs, table)?;
    scan_ism(sysfs, table)?;
    Ok(())
}

/// One row per network device, with the lower chain resolved.
fn scan_network(sysfs: &Sysfs, table: &mut DeviceTable) -> Result<()> {
    for dev in sysfs.devices(Subsystem::Network)? {
        let lowest = find_lowest(sysfs, &dev);
        let row = materialize(sysfs, &dev, lowest, None);
        table.insert(row)?;
    }
    Ok(())
}

/// One row per InfiniBand device port. A device without a ports
/// directory contributes no rows.
fn scan_infiniband(sysfs: &Sysfs, table: &mut DeviceTable) -> Result<()> {
    for dev in sysfs.devices(Subsystem::Infiniband)? {
        for port in ib_ports(&dev) {
            let row = materialize(sysfs, &dev, None, Some(port));
            table.insert(row)?;
        }
    }
    Ok(())
}

/// One row per PCI device driven by `ism`. The device acts as its own
/// parent so util-string discovery reads the same node.
fn scan_ism(sysfs: &Sysfs, table: &mut DeviceTable) -> Result<()> {
    for dev in sysfs.devices(Subsystem::Pci)? {
        if dev.driver().as_deref() != Some(ISM_DRIVER) {
            continue;
        }
        let mut row = Device::new(Subsystem::Ism, dev.name());
        row.parent = Some(dev.name().to_string());
        row.parent_subsystem = Some(dev.subsystem());
        row.pnetid = util_string::read_local_pnetid(sysfs, &dev);
        table.insert(row)?;
    }
    Ok(())
}

/// Builds one device row, resolving the bus parent and the locally
/// configured pnetid.
fn materialize(
    sysfs: &Sysfs,
    dev: &SysDevice,
    lowest: Option<String>,
    ib_port: Option<u8>,
) -> Device {
    let mut row = Device::new(dev.subsystem(), dev.name());
    row.lowest = lowest;
    row.ib_port = ib_port;
    if let Some(parent) = dev.parent() {
        row.pnetid = util_string::read_local_pnetid(sysfs, &parent);
        row.parent = Some(parent.name().to_string());
        row.parent_subsystem = Some(parent.subsystem());
    }
    row
}

/// First `lower_*` attribute of a device, if any.
fn find_lower(dev: &SysDevice) -> Option<String> {
    dev.attribute_names()
        .into_iter()
        .find_map(|name| name.strip_prefix(LOWER_PREFIX).map(str::to_string))
}

/// Terminal device of a `lower_*` chain.
///
/// Returns `None` when the device has no lower link at all, so a
/// terminal device never names itself as its own lowest peer. The chase
/// keeps a visited set and stops at the first repeated name; real
/// topologies are acyclic, but a corrupt tree must not hang the scan.
fn find_lowest(sysfs: &Sysfs, dev: &SysDevice) -> Option<String> {
    let mut visited = HashSet::new();
    visited.insert(dev.name().to_string());

    let mut lowest = None;
    let mut node = dev.clone();
    while let Some(lower) = find_lower(&node) {
        if !visited.insert(lower.clone()) {
            debug!(
                "lower chain of \"{}\" repeats \"{}\", stopping",
                dev.name(),
                lower
            );
            break;
        }
        lowest = Some(lower.clone());
        // the attribute names the device; resolution is only needed to
        // keep walking
        match sysfs.device(Subsystem::Network, &lower) {
            Some(next) => node = next,
            None => break,
        }
    }
    lowest
}

/// Ports of an InfiniBand device: the numeric entries of its `ports/`
/// directory, as the contiguous range starting at the lowest entry.
fn ib_ports(dev: &SysDevice) -> Vec<u8> {
    let ports_dir = dev.syspath().join("ports");
    let entries = match std::fs::read_dir(ports_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut ports: Vec<u8> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| name.parse().ok())
        .collect();
    ports.sort_unstable();

    match ports.first() {
        Some(&first) => (first..first.saturating_add(ports.len() as u8)).collect(),
        None => Vec::new(),
    }
}
