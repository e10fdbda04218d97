//! Local pnetid configuration: util strings attached to bus devices.
//!
//! Some platforms carry a firmware- or hypervisor-assigned pnetid in a
//! 16-byte EBCDIC blob on the device's bus parent. Reading it happens
//! before any registry round-trip, and every failure here is non-fatal:
//! the device's pnetid simply stays unset.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::ebcdic;
use crate::sysfs::{SysDevice, Sysfs};
use crate::types::{Pnetid, Subsystem, MAX_PNETID_LEN};

/// Attribute carrying the encoded pnetid.
const UTIL_STRING_ATTR: &str = "util_string";

/// Channel-path directory prefix, relative to the sysfs root.
const CCW_UTIL_PREFIX: &str = "devices/css0/chp0.";

/// Derives a device's initial pnetid from its bus parent's local
/// configuration, if any.
pub fn read_local_pnetid(sysfs: &Sysfs, parent: &SysDevice) -> Option<Pnetid> {
    match parent.subsystem() {
        Subsystem::Pci => read_pci_util_string(parent),
        Subsystem::Ccwgroup => read_ccw_util_string(sysfs, parent),
        _ => None,
    }
}

/// PCI parents expose the util string as a regular attribute.
fn read_pci_util_string(parent: &SysDevice) -> Option<Pnetid> {
    debug!(
        "trying to find util_string for pci device \"{}\"",
        parent.name()
    );
    if !parent.has_attribute(UTIL_STRING_ATTR) {
        return None;
    }
    read_util_string(&parent.syspath().join(UTIL_STRING_ATTR))
}

/// CCW group parents point at a channel path; the util string lives in
/// the channel-path directory.
fn read_ccw_util_string(sysfs: &Sysfs, parent: &SysDevice) -> Option<Pnetid> {
    debug!(
        "trying to find util_string for ccw device \"{}\"",
        parent.name()
    );
    let chpid_path = parent.syspath().join("chpid");
    let raw = std::fs::read_to_string(&chpid_path).ok()?;
    // the chpid file ends in a newline; the id is the first line
    let chpid = raw.split(['\r', '\n']).next().unwrap_or("");
    if chpid.is_empty() {
        return None;
    }
    debug!("read chpid \"{}\" from \"{}\"", chpid, chpid_path.display());

    let util_path = sysfs
        .root()
        .join(format!("{CCW_UTIL_PREFIX}{chpid}"))
        .join(UTIL_STRING_ATTR);
    read_util_string(&util_path)
}

/// Reads and transcodes one util string file.
fn read_util_string(path: &Path) -> Option<Pnetid> {
    debug!("reading util string from \"{}\"", path.display());
    let mut file = File::open(path).ok()?;
    let mut raw = [0u8; MAX_PNETID_LEN];
    let count = file.read(&mut raw).ok()?;
    if count == 0 {
        return None;
    }

    let decoded = match ebcdic::cp500_to_ascii(&raw[..count]) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!("ignoring util string \"{}\": {}", path.display(), err);
            return None;
        }
    };
    let pnetid = Pnetid::truncating(&decoded)?;
    debug!(
        "read util string \"{}\" from \"{}\"",
        pnetid,
        path.display()
    );
    Some(pnetid)
}
