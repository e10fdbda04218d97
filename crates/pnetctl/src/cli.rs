//! Command line surface.
//!
//! Exactly one of add/remove/get/flush may be given; a bare invocation
//! prints the full device table. Conflicting action flags are rejected
//! by clap, the two cross-flag rules (add needs a device, device flags
//! need an action) by [`Args::command`].

use clap::Parser;

use crate::error::{Error, Result};
use crate::types::Pnetid;

/// Print and manage pnetids.
#[derive(Parser, Debug)]
#[command(
    name = "pnetctl",
    version,
    about = "Print all devices and pnetids, or run the command given by the options",
    long_about = None
)]
pub struct Args {
    /// Add pnetid. Requires -n or -i
    #[arg(short = 'a', value_name = "PNETID", conflicts_with_all = ["remove", "get", "flush"])]
    pub add: Option<String>,

    /// Remove pnetid
    #[arg(short = 'r', value_name = "PNETID", conflicts_with_all = ["get", "flush"])]
    pub remove: Option<String>,

    /// Get devices with pnetid
    #[arg(short = 'g', value_name = "PNETID", conflicts_with = "flush")]
    pub get: Option<String>,

    /// Flush pnetids
    #[arg(short = 'f')]
    pub flush: bool,

    /// Specify net device
    #[arg(short = 'n', value_name = "NAME")]
    pub net_device: Option<String>,

    /// Specify infiniband or ism device
    #[arg(short = 'i', value_name = "NAME")]
    pub ib_device: Option<String>,

    /// Specify infiniband port (default: 1)
    #[arg(short = 'p', value_name = "PORT")]
    pub ib_port: Option<u8>,

    /// Print verbose output
    #[arg(short = 'v')]
    pub verbose: bool,
}

/// The selected command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add or update a pnetid entry in the registry.
    Add {
        /// The pnetid to add.
        pnetid: Pnetid,
        /// Ethernet device to attach it to.
        net_device: Option<String>,
        /// InfiniBand or ISM device to attach it to.
        ib_device: Option<String>,
        /// InfiniBand port.
        ib_port: Option<u8>,
    },
    /// Remove a pnetid entry from the registry.
    Remove {
        /// The pnetid to remove.
        pnetid: Pnetid,
    },
    /// Print devices carrying one pnetid.
    Get {
        /// The pnetid to filter on.
        pnetid: Pnetid,
    },
    /// Remove all pnetid entries from the registry.
    Flush,
    /// Print all devices and pnetids.
    Show,
}

impl Args {
    /// Validates the flag combination and selects the command.
    pub fn command(&self) -> Result<Command> {
        if let Some(pnetid) = &self.add {
            if self.net_device.is_none() && self.ib_device.is_none() {
                return Err(Error::Usage(
                    "adding a pnetid requires a device (-n or -i)".to_string(),
                ));
            }
            return Ok(Command::Add {
                pnetid: Pnetid::new(pnetid.clone())?,
                net_device: self.net_device.clone(),
                ib_device: self.ib_device.clone(),
                ib_port: self.ib_port,
            });
        }

        if let Some(pnetid) = &self.remove {
            return Ok(Command::Remove {
                pnetid: Pnetid::new(pnetid.clone())?,
            });
        }

        if self.flush {
            return Ok(Command::Flush);
        }

        if let Some(pnetid) = &self.get {
            return Ok(Command::Get {
                pnetid: Pnetid::new(pnetid.clone())?,
            });
        }

        // device flags make no sense without an action
        if self.net_device.is_some() || self.ib_device.is_some() || self.ib_port.is_some() {
            return Err(Error::Usage(
                "-n, -i, and -p require an action flag (-a)".to_string(),
            ));
        }

        Ok(Command::Show)
    }
}
