//! Integration tests: discovery over a synthetic sysfs tree and
//! reconciliation against a fake in-memory registry.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use pnetctl::{scan_devices, DeviceTable, Pnetid, RegistryFact, Subsystem, Sysfs};

// "NET25" followed by EBCDIC blanks.
const NET25_UTIL_STRING: [u8; 16] = [
    0xd5, 0xc5, 0xe3, 0xf2, 0xf5, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40,
    0x40,
];

/// In-memory stand-in for the kernel pnetid registry, with the same
/// add/delete/flush/dump semantics.
#[derive(Default)]
struct FakeRegistry {
    entries: Vec<RegistryFact>,
}

impl FakeRegistry {
    fn set(&mut self, pnetid: &str, eth: Option<&str>, ib: Option<&str>, ib_port: Option<u8>) {
        self.entries.push(RegistryFact {
            pnetid: Pnetid::new(pnetid).unwrap(),
            eth_name: eth.map(str::to_string),
            ib_name: ib.map(str::to_string),
            ib_port: ib.and(ib_port.or(Some(1))),
        });
    }

    fn delete(&mut self, pnetid: &str) {
        self.entries.retain(|e| e.pnetid.as_str() != pnetid);
    }

    fn flush(&mut self) {
        self.entries.clear();
    }

    fn get(&self, mut handle: impl FnMut(RegistryFact)) {
        for entry in &self.entries {
            handle(entry.clone());
        }
    }
}

fn add_net(root: &Path, name: &str, lower: Option<&str>) {
    let dir = root.join("class/net").join(name);
    fs::create_dir_all(&dir).unwrap();
    if let Some(lower) = lower {
        fs::write(dir.join(format!("lower_{lower}")), "").unwrap();
    }
}

fn add_pci_parent(root: &Path, addr: &str, with_util_string: bool) {
    let dev = root.join("bus/pci/devices").join(addr);
    fs::create_dir_all(&dev).unwrap();
    fs::create_dir_all(root.join("bus/pci")).unwrap();
    symlink(root.join("bus/pci"), dev.join("subsystem")).ok();
    if with_util_string {
        fs::write(dev.join("util_string"), NET25_UTIL_STRING).unwrap();
    }
}

fn link_parent(root: &Path, class: &str, name: &str, parent: &Path) {
    let dir = root.join(class).join(name);
    fs::create_dir_all(&dir).unwrap();
    symlink(parent, dir.join("device")).unwrap();
}

fn scan(root: &Path) -> DeviceTable {
    let sysfs = Sysfs::with_root(root).unwrap();
    let mut table = DeviceTable::new();
    scan_devices(&sysfs, &mut table).unwrap();
    table
}

#[test]
fn test_end_to_end_lo_reconciliation() -> Result<()> {
    let root = TempDir::new()?;
    add_net(root.path(), "lo", None);

    let mut table = scan(root.path());
    assert_eq!(table.len(), 1);

    let mut registry = FakeRegistry::default();
    registry.set("PNETCTL", Some("lo"), None, None);
    registry.get(|fact| {
        table.apply(&fact);
    });

    let lo = table.find(|d| d.name == "lo").unwrap();
    assert_eq!(lo.subsystem, Subsystem::Network);
    assert_eq!(lo.lowest, None);
    assert_eq!(lo.pnetid.as_ref().map(Pnetid::as_str), Some("PNETCTL"));
    Ok(())
}

#[test]
fn test_get_is_idempotent() -> Result<()> {
    let root = TempDir::new()?;
    add_net(root.path(), "lo", None);

    let mut table = scan(root.path());
    let mut registry = FakeRegistry::default();
    registry.set("PNETCTL", Some("lo"), Some("mlx5_1"), Some(1));

    for _ in 0..3 {
        registry.get(|fact| {
            table.apply(&fact);
        });
        let lo = table.find(|d| d.name == "lo").unwrap();
        assert_eq!(lo.pnetid.as_ref().map(Pnetid::as_str), Some("PNETCTL"));
    }
    Ok(())
}

#[test]
fn test_delete_then_get_leaves_no_row_with_pnetid() -> Result<()> {
    let root = TempDir::new()?;
    add_net(root.path(), "lo", None);

    let mut registry = FakeRegistry::default();
    registry.set("PNETCTL", Some("lo"), None, None);
    registry.delete("PNETCTL");

    // the table is rebuilt from scratch on every invocation
    let mut table = scan(root.path());
    registry.get(|fact| {
        table.apply(&fact);
    });
    assert!(table.iter().all(|d| d.pnetid.is_none()));
    Ok(())
}

#[test]
fn test_flush_clears_all_entries() -> Result<()> {
    let root = TempDir::new()?;
    add_net(root.path(), "eth0", None);
    add_net(root.path(), "eth1", None);

    let mut registry = FakeRegistry::default();
    registry.set("NET1", Some("eth0"), None, None);
    registry.set("NET2", Some("eth1"), None, None);
    registry.flush();

    let mut table = scan(root.path());
    registry.get(|fact| {
        table.apply(&fact);
    });
    assert!(table.iter().all(|d| d.pnetid.is_none()));
    Ok(())
}

#[test]
fn test_bonded_chain_propagates_pnetid_to_physical_parent() -> Result<()> {
    let root = TempDir::new()?;
    add_net(root.path(), "bond0", Some("eth0"));
    add_net(root.path(), "eth0", None);

    let mut table = scan(root.path());
    let mut registry = FakeRegistry::default();
    // the registry names the physical device; the bond matches via its
    // lowest-device alias
    registry.set("NET1", Some("eth0"), None, None);
    registry.get(|fact| {
        table.apply(&fact);
    });

    for name in ["bond0", "eth0"] {
        let dev = table.find(|d| d.name == name).unwrap();
        assert_eq!(
            dev.pnetid.as_ref().map(Pnetid::as_str),
            Some("NET1"),
            "device {name}"
        );
    }
    Ok(())
}

#[test]
fn test_ib_ports_reconcile_independently() -> Result<()> {
    let root = TempDir::new()?;
    let ib_dir = root.path().join("class/infiniband/mlx5_0");
    fs::create_dir_all(ib_dir.join("ports/1")).unwrap();
    fs::create_dir_all(ib_dir.join("ports/2")).unwrap();

    let mut table = scan(root.path());
    assert_eq!(table.len(), 2);

    let mut registry = FakeRegistry::default();
    registry.set("IBNET", None, Some("mlx5_0"), Some(2));
    registry.get(|fact| {
        table.apply(&fact);
    });

    let port1 = table.find(|d| d.ib_port == Some(1)).unwrap();
    let port2 = table.find(|d| d.ib_port == Some(2)).unwrap();
    assert!(port1.pnetid.is_none());
    assert_eq!(port2.pnetid.as_ref().map(Pnetid::as_str), Some("IBNET"));
    Ok(())
}

#[test]
fn test_util_string_prepopulates_and_registry_overrides() -> Result<()> {
    let root = TempDir::new()?;
    add_pci_parent(root.path(), "0000:00:01.0", true);
    link_parent(
        root.path(),
        "class/net",
        "eth0",
        &root.path().join("bus/pci/devices/0000:00:01.0"),
    );

    let mut table = scan(root.path());
    let eth0 = table.find(|d| d.name == "eth0").unwrap();
    assert_eq!(eth0.pnetid.as_ref().map(Pnetid::as_str), Some("NET25"));
    assert_eq!(eth0.parent_subsystem, Some(Subsystem::Pci));

    // registry facts are authoritative over firmware values
    let mut registry = FakeRegistry::default();
    registry.set("OVERRIDE", Some("eth0"), None, None);
    registry.get(|fact| {
        table.apply(&fact);
    });
    let eth0 = table.find(|d| d.name == "eth0").unwrap();
    assert_eq!(eth0.pnetid.as_ref().map(Pnetid::as_str), Some("OVERRIDE"));
    Ok(())
}

#[test]
fn test_mixed_tree_discovery() -> Result<()> {
    let root = TempDir::new()?;

    // plain and bonded network devices
    add_net(root.path(), "lo", None);
    add_net(root.path(), "bond0", Some("eth0"));
    add_pci_parent(root.path(), "0000:00:01.0", false);
    link_parent(
        root.path(),
        "class/net",
        "eth0",
        &root.path().join("bus/pci/devices/0000:00:01.0"),
    );

    // an infiniband adapter with one port
    let ib_dir = root.path().join("class/infiniband/mlx5_0");
    fs::create_dir_all(ib_dir.join("ports/1")).unwrap();

    // an ism adapter
    add_pci_parent(root.path(), "0000:00:02.0", true);
    fs::create_dir_all(root.path().join("bus/pci/drivers/ism")).unwrap();
    symlink(
        root.path().join("bus/pci/drivers/ism"),
        root.path()
            .join("bus/pci/devices/0000:00:02.0")
            .join("driver"),
    )
    .unwrap();

    let table = scan(root.path());

    let subsystems: Vec<_> = table.iter().map(|d| d.subsystem).collect();
    assert_eq!(
        subsystems,
        [
            Subsystem::Network,
            Subsystem::Network,
            Subsystem::Network,
            Subsystem::Infiniband,
            Subsystem::Ism,
        ]
    );

    // the ism adapter read its own util string through the self-parent
    let ism = table.find(|d| d.subsystem == Subsystem::Ism).unwrap();
    assert_eq!(ism.parent.as_deref(), Some("0000:00:02.0"));
    assert_eq!(ism.pnetid.as_ref().map(Pnetid::as_str), Some("NET25"));
    Ok(())
}
