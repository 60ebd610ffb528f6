//! Named address sets
//!
//! Rules reference these by name through [`AddressSpec::NamedSet`](super::address::AddressSpec).
//! The rule model never requires a referenced set to exist; resolution only happens
//! when matching.

use super::address::{AddressRange, AddressSetResolver};
use crate::core::error::{Error, Result};
use crate::validators::validate_set_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl AddressSet {
    /// Builds a set from raw members, dropping duplicates while keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or any member is not an address range.
    pub fn new(name: &str, members: impl IntoIterator<Item = String>) -> Result<Self> {
        validate_set_name(name).map_err(|message| Error::validation("name", message))?;

        let mut set = Self {
            name: name.to_string(),
            members: Vec::new(),
        };
        for member in members {
            set.add_member(&member)?;
        }
        Ok(set)
    }

    /// Adds a member. Returns `false` if an equal range is already present.
    ///
    /// # Errors
    ///
    /// Fails if `member` is not an address range.
    pub fn add_member(&mut self, member: &str) -> Result<bool> {
        let range: AddressRange = member
            .parse()
            .map_err(|message| Error::validation("members", message))?;

        if self.ranges().any(|existing| existing == range) {
            return Ok(false);
        }
        self.members.push(range.to_string());
        Ok(true)
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.ranges().any(|range| range.contains(addr))
    }

    /// Re-checks a set that arrived through deserialization.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name or member.
    pub fn validate(&self) -> Result<()> {
        validate_set_name(&self.name).map_err(|message| Error::validation("name", message))?;
        for member in &self.members {
            member
                .parse::<AddressRange>()
                .map_err(|message| Error::validation("members", message))?;
        }
        Ok(())
    }

    fn ranges(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.members.iter().filter_map(|member| member.parse().ok())
    }
}

/// Address sets keyed by name
pub type AddressSets = BTreeMap<String, AddressSet>;

impl AddressSetResolver for AddressSets {
    fn set_contains(&self, name: &str, addr: IpAddr) -> Option<bool> {
        self.get(name).map(|set| set.contains(addr))
    }
}
