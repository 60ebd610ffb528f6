//! Shared vocabulary for rules stored in an ordered list
//!
//! Policies and NAT rules are different entities with different outcomes, but the
//! ordered list only needs a handful of things from them: an id slot, match criteria,
//! and a validation hook. [`Entry`] captures exactly that.

use super::address::{AddressSetResolver, AddressSpec};
use crate::core::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Stable rule identifier assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RuleId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(RuleId)
    }
}

impl From<u64> for RuleId {
    fn from(id: u64) -> Self {
        RuleId(id)
    }
}

/// Which ordered list a rule lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum RuleKind {
    #[strum(serialize = "policy")]
    Policy,
    #[strum(serialize = "nat rule")]
    Nat,
}

impl RuleKind {
    /// Resource path segment used by the API.
    pub const fn resource(self) -> &'static str {
        match self {
            RuleKind::Policy => "policies",
            RuleKind::Nat => "nat",
        }
    }
}

/// A rule that can live in an [`OrderedRuleList`](super::ordered_list::OrderedRuleList).
pub trait Entry: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static {
    const KIND: RuleKind;

    /// `None` until the store assigns one.
    fn id(&self) -> Option<RuleId>;

    fn set_id(&mut self, id: RuleId);

    fn clear_id(&mut self);

    fn source(&self) -> &AddressSpec;

    fn destination(&self) -> &AddressSpec;

    /// Checks field-level invariants.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first offending field.
    fn validate(&self) -> Result<()>;

    /// Inactive rules stay in the list but never match traffic.
    fn is_active(&self) -> bool {
        true
    }

    /// Identity comparison: same entity iff both carry the same assigned id.
    fn same_entity(&self, other: &Self) -> bool {
        self.id().is_some() && self.id() == other.id()
    }

    fn matches(&self, src: IpAddr, dst: IpAddr, resolver: &dyn AddressSetResolver) -> bool {
        self.is_active()
            && self.source().matches(src, resolver)
            && self.destination().matches(dst, resolver)
    }

    /// Whether either address criterion references the named set.
    fn references_set(&self, name: &str) -> bool {
        self.source().named_set() == Some(name) || self.destination().named_set() == Some(name)
    }
}
