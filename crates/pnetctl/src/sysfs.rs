//! The device enumeration source: a root-relocatable sysfs walker.
//!
//! Production code walks `/sys`; tests point the walker at a synthetic
//! tree. Class devices (`class/net`, `class/infiniband`) and bus devices
//! (`bus/pci/devices`) are listed through the same interface, and each
//! device exposes its attribute names, bus parent, and driver the way the
//! kernel lays them out on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Subsystem;

/// Handle on a sysfs tree.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    /// Opens the system sysfs at `/sys`.
    pub fn new() -> Result<Self> {
        Self::with_root("/sys")
    }

    /// Opens a sysfs tree rooted at an arbitrary path.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(Self { root }),
            Ok(_) => Err(Error::Context {
                path: root,
                source: io::Error::from(io::ErrorKind::NotADirectory),
            }),
            Err(source) => Err(Error::Context { path: root, source }),
        }
    }

    /// The root of this tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory listing the devices of a subsystem, relative to the root.
    fn listing_dir(&self, subsystem: Subsystem) -> Result<PathBuf> {
        let rel = match subsystem {
            Subsystem::Network => "class/net",
            Subsystem::Infiniband => "class/infiniband",
            Subsystem::Pci => "bus/pci/devices",
            _ => return Err(Error::Filter { subsystem }),
        };
        Ok(self.root.join(rel))
    }

    /// Lists all devices of a subsystem, sorted by name for deterministic
    /// presentation.
    ///
    /// A missing listing directory is an empty subsystem, not an error
    /// (a host without InfiniBand has no `class/infiniband` at all).
    pub fn devices(&self, subsystem: Subsystem) -> Result<Vec<SysDevice>> {
        let dir = self.listing_dir(subsystem)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                debug!("no {} listing at {}", subsystem, dir.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(Error::Enumerate {
                    subsystem,
                    path: dir,
                    source,
                })
            }
        };

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Scan {
                path: dir.clone(),
                source,
            })?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| Error::Node {
                    path: dir.join(&name),
                    reason: "device name is not valid UTF-8".to_string(),
                })?;
            devices.push(SysDevice {
                subsystem,
                name,
                path: entry.path(),
            });
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Resolves a device by subsystem and name.
    pub fn device(&self, subsystem: Subsystem, name: &str) -> Option<SysDevice> {
        let dir = self.listing_dir(subsystem).ok()?;
        let path = dir.join(name);
        fs::metadata(&path).ok()?;
        Some(SysDevice {
            subsystem,
            name: name.to_string(),
            path,
        })
    }
}

/// One device node in a sysfs tree.
#[derive(Debug, Clone)]
pub struct SysDevice {
    subsystem: Subsystem,
    name: String,
    path: PathBuf,
}

impl SysDevice {
    /// The device's system name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The subsystem the device was listed under.
    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    /// Filesystem path of the device node.
    pub fn syspath(&self) -> &Path {
        &self.path
    }

    /// Names of the device's extended attributes, sorted.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.path) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Whether an extended attribute with this name exists.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.path.join(name).exists()
    }

    /// Reads a text attribute, trimmed of trailing whitespace.
    pub fn read_attribute(&self, name: &str) -> Option<String> {
        let raw = fs::read_to_string(self.path.join(name)).ok()?;
        Some(raw.trim_end().to_string())
    }

    /// The device's bus parent, reached through the `device` symlink.
    ///
    /// Devices without a bus parent (`lo`, virtual interfaces) have no
    /// such link and resolve to `None`.
    pub fn parent(&self) -> Option<SysDevice> {
        let link = self.path.join("device");
        fs::read_link(&link).ok()?;
        let path = fs::canonicalize(&link).ok()?;
        let name = path.file_name()?.to_str()?.to_string();
        let subsystem = subsystem_of(&path);
        Some(SysDevice {
            subsystem,
            name,
            path,
        })
    }

    /// Name of the driver bound to the device, if any.
    pub fn driver(&self) -> Option<String> {
        let target = fs::read_link(self.path.join("driver")).ok()?;
        Some(target.file_name()?.to_str()?.to_string())
    }
}

/// Subsystem of a device directory, from the basename of its `subsystem`
/// symlink.
fn subsystem_of(path: &Path) -> Subsystem {
    match fs::read_link(path.join("subsystem")) {
        Ok(target) => target
            .file_name()
            .and_then(|n| n.to_str())
            .map(Subsystem::from_tag)
            .unwrap_or(Subsystem::Other),
        Err(_) => Subsystem::Other,
    }
}
