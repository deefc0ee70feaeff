//! Known devices and their human-readable aliases.
//!
//! The table maps lower-case device addresses to names. It decides the device
//! segment of every topic and, when restricted, which devices are processed at
//! all.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// A type alias for address-to-name mappings.
pub type AliasMap = BTreeMap<String, String>;

/// A parsed alias mapping a device address to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Canonical lower-case address (e.g., "aa:bb:cc:dd:ee:ff")
    pub address: String,
    /// The human-readable name (e.g., "Sauna")
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// The address may be given in either case and is stored lower-case.
///
/// # Example
/// ```
/// use ble_mqtt::alias::parse_alias;
///
/// let alias = parse_alias("AA:BB:CC:DD:EE:FF=Kitchen").unwrap();
/// assert_eq!(alias.address, "aa:bb:cc:dd:ee:ff");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;
    let mac: MacAddress = address
        .parse()
        .map_err(|e| format!("invalid alias: {e}"))?;

    Ok(Alias {
        address: mac.to_string(),
        name: name.into(),
    })
}

/// Known-device table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownDevices {
    aliases: AliasMap,
}

impl KnownDevices {
    pub fn new(aliases: AliasMap) -> Self {
        Self { aliases }
    }

    /// Add or override entries from the command line.
    pub fn with_aliases(mut self, aliases: &[Alias]) -> Self {
        self.aliases.extend(
            aliases
                .iter()
                .map(|a| (a.address.clone(), a.name.clone())),
        );
        self
    }

    fn alias(&self, address: &str) -> Option<&str> {
        self.aliases
            .get(address)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Whether the address has a non-empty alias.
    pub fn is_known(&self, address: &str) -> bool {
        self.alias(address).is_some()
    }

    /// Resolve the identity used in topics: the alias if configured, otherwise
    /// the address itself.
    pub fn resolve<'a>(&'a self, address: &'a str) -> &'a str {
        self.alias(address).unwrap_or(address)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
