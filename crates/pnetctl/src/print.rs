//! Device table rendering.
//!
//! Devices print grouped by pnetid in table order, followed by an `n/a`
//! section for devices without one. With an active filter only matching
//! devices print. Output goes to any writer so tests can capture it.

use std::io::{self, Write};

use crate::table::DeviceTable;
use crate::types::{Device, Subsystem};

const LINE: &str = "--------------------------------------------------------------------";
const BOLD_LINE: &str = "====================================================================";

fn print_header(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{BOLD_LINE}")?;
    writeln!(
        out,
        "{:<16} {:>5.5} {:>15.15} {:>6.6} {:>5.5} {:>16.16}",
        "Pnetid:", "Type:", "Name:", "Port:", "Bus:", "Bus-ID:"
    )?;
    writeln!(out, "{BOLD_LINE}")
}

fn print_pnetid(out: &mut impl Write, pnetid: &str) -> io::Result<()> {
    writeln!(out, "{pnetid}")?;
    writeln!(out, "{LINE}")
}

fn print_device(out: &mut impl Write, device: &Device) -> io::Result<()> {
    write!(out, "{:<16}", "")?;
    if device.subsystem == Subsystem::Infiniband {
        write!(out, " {:>5.5}", "ib")?;
        write!(out, " {:>15.15}", device.name)?;
        write!(out, " {:>6}", device.ib_port.unwrap_or(0))?;
    } else {
        write!(out, " {:>5.5}", device.subsystem.as_str())?;
        write!(out, " {:>15.15}", device.name)?;
        write!(out, " {:>6.6}", "")?;
    }
    match &device.parent_subsystem {
        Some(bus) => write!(out, "   {:>3.3}", bus.as_str())?,
        None => write!(out, " {:>5.5}", "n/a")?,
    }
    match &device.parent {
        Some(parent) => write!(out, " {:>16.16}", parent)?,
        None => write!(out, " {:>16.16}", "n/a")?,
    }
    writeln!(out)
}

/// Prints the device table grouped by pnetid.
///
/// `filter` restricts output to one pnetid and suppresses the `n/a`
/// section.
pub fn print_device_table(
    table: &mut DeviceTable,
    filter: Option<&str>,
    out: &mut impl Write,
) -> io::Result<()> {
    print_header(out)?;

    // each pass collects one pnetid group in table order
    let mut pnetid_found = true;
    while pnetid_found {
        pnetid_found = false;
        let mut current: Option<String> = None;

        for device in table.iter_mut() {
            if device.reported {
                continue;
            }
            let Some(pnetid) = device.pnetid.clone() else {
                continue;
            };

            if let Some(filter) = filter {
                if pnetid.as_str() == filter {
                    print_device(out, device)?;
                    device.reported = true;
                }
                continue;
            }

            match &current {
                Some(current) => {
                    if pnetid.as_str() == current {
                        print_device(out, device)?;
                        device.reported = true;
                    }
                }
                None => {
                    pnetid_found = true;
                    current = Some(pnetid.as_str().to_string());
                    print_pnetid(out, pnetid.as_str())?;
                    print_device(out, device)?;
                    device.reported = true;
                }
            }
        }

        if pnetid_found && filter.is_none() {
            writeln!(out, "{LINE}")?;
        }
    }

    if filter.is_some() {
        return Ok(());
    }

    // devices without a pnetid
    print_pnetid(out, "n/a")?;
    for device in table.iter_mut() {
        if !device.reported {
            print_device(out, device)?;
        }
    }
    Ok(())
}
