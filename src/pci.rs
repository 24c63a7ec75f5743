// PCI address parsing and address list normalization
//
// Addresses arrive in two conventions: comma separated from the command line
// and space separated from the config file. Everything handed to the backend
// is the canonical space separated, sorted, deduplicated form.

use crate::{ProvisionError, ProvisionResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    // domain:bus:device.function, VMD backing devices use a 6 digit domain
    static ref PCI_ADDR_RE: Regex = Regex::new(
        r"^([0-9a-fA-F]{4,6}):([0-9a-fA-F]{2}):([0-9a-fA-F]{2})\.([0-7])$"
    )
    .expect("PCI address regex is valid");
}

/// A single PCI address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl FromStr for PciAddress {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProvisionError::InvalidAddress(s.to_string());
        let caps = PCI_ADDR_RE.captures(s.trim()).ok_or_else(invalid)?;

        let hex_u32 = |i: usize| u32::from_str_radix(&caps[i], 16).map_err(|_| invalid());
        let hex_u8 = |i: usize| u8::from_str_radix(&caps[i], 16).map_err(|_| invalid());

        let device = hex_u8(3)?;
        if device > 0x1f {
            return Err(invalid());
        }

        Ok(PciAddress {
            domain: hex_u32(1)?,
            bus: hex_u8(2)?,
            device,
            function: hex_u8(4)?,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Deduplicated, ordered set of PCI addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PciAddressSet(BTreeSet<PciAddress>);

impl PciAddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every address in `items`, failing on the first bad token
    pub fn from_strings<I, S>(items: I) -> ProvisionResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for item in items {
            let item = item.as_ref().trim();
            if item.is_empty() {
                continue;
            }
            set.insert(item.parse()?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, addr: PciAddress) -> bool {
        self.0.insert(addr)
    }

    pub fn contains(&self, addr: &PciAddress) -> bool {
        self.0.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PciAddress> {
        self.0.iter()
    }

    /// Addresses in `self` that are not in `other`
    pub fn difference(&self, other: &PciAddressSet) -> PciAddressSet {
        PciAddressSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &PciAddressSet) -> PciAddressSet {
        PciAddressSet(self.0.union(&other.0).copied().collect())
    }

    /// Collect into sorted strings
    pub fn strings(&self) -> Vec<String> {
        self.0.iter().map(|a| a.to_string()).collect()
    }
}

impl FromStr for PciAddressSet {
    type Err = ProvisionError;

    /// Accepts comma and/or whitespace separated addresses
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_strings(s.split(|c: char| c == ',' || c.is_whitespace()))
    }
}

impl fmt::Display for PciAddressSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.strings().join(" "))
    }
}

impl FromIterator<PciAddress> for PciAddressSet {
    fn from_iter<T: IntoIterator<Item = PciAddress>>(iter: T) -> Self {
        PciAddressSet(iter.into_iter().collect())
    }
}

/// Normalize a comma separated address list into the canonical space
/// separated form.
///
/// A list already containing a space is taken to be in config convention and
/// returned unchanged, which makes sanitizing canonical output a no-op. Each
/// of its tokens must still be a single valid address, so commas mixed into
/// a space separated list are rejected.
pub fn sanitize_address_list(list: &str) -> ProvisionResult<String> {
    if list.contains(' ') {
        for token in list.split_whitespace() {
            token.parse::<PciAddress>()?;
        }
        return Ok(list.to_string());
    }

    let set: PciAddressSet = list.parse()?;
    Ok(set.to_string())
}
