//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::address::AddressSpec;
use crate::core::nat::NatRule;
use crate::core::ordered_list::OrderedRuleList;
use crate::core::policy::{Action, Policy};
use crate::core::store::RuleStore;

/// Unsaved policy matching any traffic with the given action.
pub fn policy(action: Action) -> Policy {
    Policy {
        action,
        ..Policy::default()
    }
}

/// Unsaved policy with literal source addresses.
pub fn policy_from(sources: &[&str], action: Action) -> Policy {
    Policy {
        source: literal(sources),
        action,
        ..Policy::default()
    }
}

pub fn literal(entries: &[&str]) -> AddressSpec {
    AddressSpec::Literal(entries.iter().map(|e| (*e).to_string()).collect())
}

/// Unsaved masquerade rule on `eth0`.
pub fn nat_rule() -> NatRule {
    NatRule::masquerade("eth0")
}

/// List whose rules get ids 1..=n in the given order, at version 0.
pub fn list_of(actions: &[Action]) -> OrderedRuleList<Policy> {
    let rules = actions.iter().map(|a| policy(*a)).collect();
    OrderedRuleList::from_unassigned(rules, 0).expect("valid test rules")
}

/// Ids of a list in evaluation order, as plain numbers for terse assertions.
pub fn ids_of(list: &OrderedRuleList<Policy>) -> Vec<u64> {
    list.ids().iter().map(|id| id.0).collect()
}

/// Store seeded with `[{id:1, Accept}, {id:2, Drop}]`.
pub fn seeded_store() -> RuleStore {
    let store = RuleStore::new();
    store
        .create(policy(Action::Accept), None, None)
        .expect("seed policy 1");
    store
        .create(policy(Action::Drop), None, None)
        .expect("seed policy 2");
    store
}
