//! pnetctl - pnetid management
//!
//! Discovers network, InfiniBand, and ISM devices through sysfs, resolves
//! their bus topology, derives firmware-assigned pnetids from device-local
//! configuration, and reconciles the result against the kernel's pnetid
//! registry over the `SMC_PNETID` generic netlink family.

pub mod cli;
pub mod commands;
pub mod ebcdic;
pub mod error;
pub mod netlink;
pub mod print;
pub mod scan;
pub mod sysfs;
pub mod table;
pub mod types;
pub mod util_string;

pub use cli::{Args, Command};
pub use error::{Error, Result};
pub use netlink::{RegistryClient, SmcPnetidAttr, SmcPnetidCmd};
pub use print::print_device_table;
pub use scan::scan_devices;
pub use sysfs::{SysDevice, Sysfs};
pub use table::{DeviceTable, RegistryFact};
pub use types::{Device, Pnetid, Subsystem, IB_DEFAULT_PORT, MAX_PNETID_LEN};
