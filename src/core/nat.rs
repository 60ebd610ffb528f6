//! Source NAT rules
//!
//! A [`NatRule`] rewrites the source of matching traffic leaving through its egress
//! interface, either to the interface's own address ([`NatTarget::Dynamic`],
//! masquerade) or to a fixed address ([`NatTarget::Static`]).

use super::address::AddressSpec;
use super::rule::{Entry, RuleId, RuleKind};
use crate::core::error::{Error, Result};
use crate::validators::{validate_description, validate_egress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum NatTarget {
    /// Masquerade using the egress interface address
    #[default]
    #[strum(serialize = "dynamic")]
    Dynamic,
    /// Translate to `target_address`
    #[strum(serialize = "static")]
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NatRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub source: AddressSpec,
    #[serde(default)]
    pub destination: AddressSpec,
    #[serde(default)]
    pub egress: String,
    #[serde(default)]
    pub target: NatTarget,
    /// Present iff `target` is [`NatTarget::Static`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_address: Option<String>,
    #[serde(default)]
    pub log: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NatRule {
    fn default() -> Self {
        Self {
            id: None,
            description: String::new(),
            enabled: true,
            source: AddressSpec::Any,
            destination: AddressSpec::Any,
            egress: String::new(),
            target: NatTarget::Dynamic,
            target_address: None,
            log: false,
        }
    }
}

impl NatRule {
    /// Masquerade rule for traffic leaving through `egress`.
    pub fn masquerade(egress: impl Into<String>) -> Self {
        Self {
            egress: egress.into(),
            ..Self::default()
        }
    }

    /// Static source translation to `address` for traffic leaving through `egress`.
    pub fn static_to(egress: impl Into<String>, address: IpAddr) -> Self {
        Self {
            egress: egress.into(),
            target: NatTarget::Static,
            target_address: Some(address.to_string()),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the egress interface is missing or malformed,
    /// if the target address disagrees with the target kind, or if an address
    /// criterion is malformed.
    pub fn validate(&self) -> Result<()> {
        validate_egress(&self.egress).map_err(|message| Error::validation("egress", message))?;
        validate_description(&self.description)
            .map_err(|message| Error::validation("description", message))?;

        match (self.target, self.target_address.as_deref()) {
            (NatTarget::Static, None) => {
                return Err(Error::validation(
                    "target_address",
                    "static target requires a target address",
                ));
            }
            (NatTarget::Static, Some(address)) => {
                address.trim().parse::<IpAddr>().map_err(|_| {
                    Error::validation(
                        "target_address",
                        format!("'{address}' is not a single IP address"),
                    )
                })?;
            }
            (NatTarget::Dynamic, Some(_)) => {
                return Err(Error::validation(
                    "target_address",
                    "dynamic target must not carry a target address",
                ));
            }
            (NatTarget::Dynamic, None) => {}
        }

        self.source.validate("source")?;
        self.destination.validate("destination")?;
        Ok(())
    }

    /// The translated address for static rules.
    pub fn static_address(&self) -> Option<IpAddr> {
        match self.target {
            NatTarget::Static => self
                .target_address
                .as_deref()
                .and_then(|address| address.trim().parse().ok()),
            NatTarget::Dynamic => None,
        }
    }

    pub fn target_display(&self) -> String {
        match self.target {
            NatTarget::Dynamic => "Dynamic (egress masquerade)".to_string(),
            NatTarget::Static => format!(
                "Static {}",
                self.target_address.as_deref().unwrap_or("(missing)")
            ),
        }
    }
}

impl Entry for NatRule {
    const KIND: RuleKind = RuleKind::Nat;

    fn id(&self) -> Option<RuleId> {
        self.id
    }

    fn set_id(&mut self, id: RuleId) {
        self.id = Some(id);
    }

    fn clear_id(&mut self) {
        self.id = None;
    }

    fn source(&self) -> &AddressSpec {
        &self.source
    }

    fn destination(&self) -> &AddressSpec {
        &self.destination
    }

    fn validate(&self) -> Result<()> {
        NatRule::validate(self)
    }

    fn is_active(&self) -> bool {
        self.enabled
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "#{id:<4}")?,
            None => write!(f, "#new ")?,
        }
        write!(
            f,
            " {} -> {} via {}: {}",
            self.source,
            self.destination,
            self.egress,
            self.target_display()
        )?;
        if !self.enabled {
            write!(f, " [disabled]")?;
        }
        Ok(())
    }
}
