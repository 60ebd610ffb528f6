//! Configuration documents
//!
//! A [`ConfigDocument`] is the full, portable content of a store: both rule lists in
//! evaluation order plus every named address set. It is what `GET /export` returns
//! and what `POST /import` accepts.

use super::address_set::AddressSet;
use super::nat::NatRule;
use super::policy::Policy;
use super::rule::Entry;
use crate::core::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current document format version
pub const FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Absent in hand-written documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub nat: Vec<NatRule>,
    #[serde(default)]
    pub address_sets: Vec<AddressSet>,
}

impl ConfigDocument {
    pub fn new(policies: Vec<Policy>, nat: Vec<NatRule>, address_sets: Vec<AddressSet>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            exported_at: Some(Utc::now()),
            policies,
            nat,
            address_sets,
        }
    }

    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a document, rejecting unsupported format versions.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed JSON or an unknown format version.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(json)
            .map_err(|e| Error::validation("document", e.to_string()))?;
        document.check_format()?;
        Ok(document)
    }

    /// # Errors
    ///
    /// Returns a validation error if `format_version` is not supported.
    pub fn check_format(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::validation(
                "format_version",
                format!(
                    "unsupported document version {} (expected {FORMAT_VERSION})",
                    self.format_version
                ),
            ));
        }
        Ok(())
    }

    /// Compares rule content and order, ignoring ids and the export timestamp.
    pub fn same_content(&self, other: &Self) -> bool {
        fn strip<R: Entry>(rules: &[R]) -> Vec<R> {
            rules
                .iter()
                .cloned()
                .map(|mut rule| {
                    rule.clear_id();
                    rule
                })
                .collect()
        }

        let mut ours = self.address_sets.clone();
        let mut theirs = other.address_sets.clone();
        ours.sort_by(|a, b| a.name.cmp(&b.name));
        theirs.sort_by(|a, b| a.name.cmp(&b.name));

        strip(&self.policies) == strip(&other.policies)
            && strip(&self.nat) == strip(&other.nat)
            && ours == theirs
    }
}
