//! Core type definitions: subsystems, pnetids, and device records.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::Error;

/// Maximum length of a pnetid in bytes.
pub const MAX_PNETID_LEN: usize = 16;

/// Default port for InfiniBand devices.
pub const IB_DEFAULT_PORT: u8 = 1;

/// Device subsystem, decided once when a device is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Network interface (`net` class).
    Network,
    /// InfiniBand host channel adapter.
    Infiniband,
    /// ISM adapter (PCI device driven by the `ism` driver).
    Ism,
    /// PCI bus device.
    Pci,
    /// CCW group device (channel-path backed bus group).
    Ccwgroup,
    /// Anything else.
    Other,
}

impl Subsystem {
    /// The sysfs tag for this subsystem.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Network => "net",
            Subsystem::Infiniband => "infiniband",
            Subsystem::Ism => "ism",
            Subsystem::Pci => "pci",
            Subsystem::Ccwgroup => "ccwgroup",
            Subsystem::Other => "other",
        }
    }

    /// Classify a sysfs subsystem tag. Unknown tags map to `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "net" => Subsystem::Network,
            "infiniband" => Subsystem::Infiniband,
            "ism" => Subsystem::Ism,
            "pci" => Subsystem::Pci,
            "ccwgroup" => Subsystem::Ccwgroup,
            _ => Subsystem::Other,
        }
    }
}

impl FromStr for Subsystem {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Subsystem::from_tag(s))
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated pnetid: at most [`MAX_PNETID_LEN`] bytes, no interior NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pnetid(String);

impl Pnetid {
    /// Validates and wraps a pnetid string.
    ///
    /// Rejects empty values, values longer than [`MAX_PNETID_LEN`] bytes,
    /// and values containing a NUL byte.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_pnetid(value, "pnetid is empty"));
        }
        if value.len() > MAX_PNETID_LEN {
            return Err(Error::invalid_pnetid(
                value,
                format!("pnetid exceeds {MAX_PNETID_LEN} bytes"),
            ));
        }
        if value.contains('\0') {
            return Err(Error::invalid_pnetid(value, "pnetid contains a NUL byte"));
        }
        Ok(Self(value))
    }

    /// Wraps a pnetid read from device-local configuration: the value
    /// ends at the first NUL, trailing blanks are stripped, and
    /// over-length values are truncated with a logged warning. Returns
    /// `None` for an empty value.
    pub fn truncating(value: &str) -> Option<Self> {
        let value = value.split('\0').next().unwrap_or("");
        let value = value.trim_end_matches(' ');
        if value.is_empty() {
            return None;
        }
        if value.len() > MAX_PNETID_LEN {
            let mut end = MAX_PNETID_LEN;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            warn!(
                "truncating over-length pnetid \"{}\" to {} bytes",
                value, MAX_PNETID_LEN
            );
            return Some(Self(value[..end].to_string()));
        }
        Some(Self(value.to_string()))
    }

    /// The pnetid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pnetid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Pnetid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Pnetid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pnetid::new(s)
    }
}

/// A discovered hardware endpoint in the device table.
#[derive(Debug, Clone)]
pub struct Device {
    /// Subsystem category.
    pub subsystem: Subsystem,
    /// The device's own identifier.
    pub name: String,
    /// Immediate bus parent's identifier, if any.
    pub parent: Option<String>,
    /// Bus parent's subsystem, if any.
    pub parent_subsystem: Option<Subsystem>,
    /// For network devices, the terminal device of the `lower_*` chain.
    /// Unset when the device itself is terminal.
    pub lowest: Option<String>,
    /// Port number for InfiniBand devices.
    pub ib_port: Option<u8>,
    /// Assigned pnetid, empty until set by local configuration or the
    /// registry.
    pub pnetid: Option<Pnetid>,
    /// Transient flag used by the printer to avoid double-reporting.
    pub(crate) reported: bool,
}

impl Device {
    /// Creates a device record with only the key fields set.
    pub fn new(subsystem: Subsystem, name: impl Into<String>) -> Self {
        Self {
            subsystem,
            name: name.into(),
            parent: None,
            parent_subsystem: None,
            lowest: None,
            ib_port: None,
            pnetid: None,
            reported: false,
        }
    }
}
