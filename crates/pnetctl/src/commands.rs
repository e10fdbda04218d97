//! Command drivers.
//!
//! Each driver owns its resources for the duration of one command: the
//! device table lives on the stack of `run_get`, and the registry
//! connection closes when the client drops, on every exit path.

use std::io;

use tracing::{debug, error};

use crate::cli::Command;
use crate::error::Result;
use crate::netlink::RegistryClient;
use crate::print;
use crate::scan;
use crate::sysfs::Sysfs;
use crate::table::DeviceTable;
use crate::types::Pnetid;

/// Runs the selected command.
pub fn run(command: Command) -> Result<()> {
    match command {
        Command::Flush => run_flush(),
        Command::Remove { pnetid } => run_del(&pnetid),
        Command::Add {
            pnetid,
            net_device,
            ib_device,
            ib_port,
        } => run_add(&pnetid, net_device.as_deref(), ib_device.as_deref(), ib_port),
        Command::Get { pnetid } => run_get(Some(pnetid)),
        Command::Show => run_get(None),
    }
}

/// Removes all pnetid entries.
fn run_flush() -> Result<()> {
    debug!("flushing all pnetids");
    let mut client = RegistryClient::connect()?;
    client.flush()
}

/// Removes one pnetid entry.
fn run_del(pnetid: &Pnetid) -> Result<()> {
    debug!("removing pnetid \"{}\"", pnetid);
    let mut client = RegistryClient::connect()?;
    client.delete(pnetid)
}

/// Adds a pnetid entry. The caller has already checked that at least
/// one device is present.
fn run_add(
    pnetid: &Pnetid,
    net_device: Option<&str>,
    ib_device: Option<&str>,
    ib_port: Option<u8>,
) -> Result<()> {
    debug!("adding pnetid \"{}\"", pnetid);
    let mut client = RegistryClient::connect()?;
    client.set(pnetid, net_device, ib_device, ib_port)
}

/// Discovers devices, reconciles registry pnetids onto them, and prints
/// the table.
///
/// An unreachable registry degrades to printing the discovered devices
/// with only their locally configured pnetids; a failed scan is fatal
/// and the partial table is discarded.
fn run_get(filter: Option<Pnetid>) -> Result<()> {
    debug!("trying to find devices and read their pnetids from util strings");
    let sysfs = Sysfs::new()?;
    let mut table = DeviceTable::new();
    scan::scan_devices(&sysfs, &mut table)?;

    debug!("trying to read pnetids via netlink");
    match RegistryClient::connect() {
        Ok(mut client) => {
            if let Err(err) = client.get(|fact| {
                table.apply(&fact);
            }) {
                error!("reading pnetids from the registry failed: {}", err);
            }
        }
        Err(err) => error!("connecting to the pnetid registry failed: {}", err),
    }

    debug!("printing device table");
    let stdout = io::stdout();
    if let Err(err) = print::print_device_table(
        &mut table,
        filter.as_ref().map(Pnetid::as_str),
        &mut stdout.lock(),
    ) {
        debug!("writing device table failed: {}", err);
    }
    Ok(())
}
