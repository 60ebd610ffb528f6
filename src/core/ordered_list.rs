//! Ordered rule lists
//!
//! An [`OrderedRuleList`] keeps identity and position apart: rules live in an arena
//! keyed by [`RuleId`], and a separate vector of ids records evaluation order. Moving
//! a rule only touches the order vector; editing a rule only touches the arena.
//!
//! All mutations are all-or-nothing. Every check (validation, id and anchor lookup,
//! capacity) runs before anything is written, so a failed call leaves the list exactly
//! as it was.
//!
//! # Limits
//!
//! Lists are limited to [`MAX_RULES`] rules to prevent memory exhaustion.

use super::address::AddressSetResolver;
use super::rule::{Entry, RuleId};
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Maximum number of rules allowed in a single list
pub const MAX_RULES: usize = 1000;

/// Rules in evaluation order together with the list version they were read at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSnapshot<R> {
    pub version: u64,
    pub rules: Vec<R>,
}

#[derive(Debug, Clone)]
pub struct OrderedRuleList<R> {
    entries: HashMap<RuleId, R>,
    order: Vec<RuleId>,
    next_id: u64,
    version: u64,
}

impl<R: Entry> Default for OrderedRuleList<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Entry> OrderedRuleList<R> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
            version: 0,
        }
    }

    /// Rebuilds a list from persisted rules that already carry ids.
    ///
    /// `next_id` is raised past the largest id present so ids are never reused.
    ///
    /// # Errors
    ///
    /// Fails if a rule has no id, if ids repeat, if a rule is invalid, or if there
    /// are more than [`MAX_RULES`] rules.
    pub fn from_parts(rules: Vec<R>, next_id: u64, version: u64) -> Result<Self> {
        check_capacity::<R>(rules.len())?;

        let mut list = Self {
            entries: HashMap::with_capacity(rules.len()),
            order: Vec::with_capacity(rules.len()),
            next_id: next_id.max(1),
            version,
        };

        for rule in rules {
            rule.validate()?;
            let id = rule.id().ok_or_else(|| {
                Error::validation("id", format!("stored {} has no id", R::KIND))
            })?;
            if list.entries.contains_key(&id) {
                return Err(Error::validation(
                    "id",
                    format!("duplicate {} id {id}", R::KIND),
                ));
            }
            let after = id.0.checked_add(1).ok_or_else(|| {
                Error::validation("id", format!("{} id {id} is out of range", R::KIND))
            })?;
            list.next_id = list.next_id.max(after);
            list.order.push(id);
            list.entries.insert(id, rule);
        }

        Ok(list)
    }

    /// Builds a list from rules whose ids are ignored and reassigned in order,
    /// starting at 1. Used when importing a configuration document.
    ///
    /// # Errors
    ///
    /// Fails if any rule is invalid or there are more than [`MAX_RULES`] rules.
    pub fn from_unassigned(rules: Vec<R>, version: u64) -> Result<Self> {
        check_capacity::<R>(rules.len())?;

        let mut list = Self::new();
        list.version = version;
        for mut rule in rules {
            rule.validate()?;
            let id = list.allocate_id()?;
            rule.set_id(id);
            list.order.push(id);
            list.entries.insert(id, rule);
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Incremented on every successful mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The id the next inserted rule will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn ids(&self) -> &[RuleId] {
        &self.order
    }

    pub fn get(&self, id: RuleId) -> Option<&R> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn position(&self, id: RuleId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Rules in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &R> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn to_vec(&self) -> Vec<R> {
        self.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ListSnapshot<R> {
        ListSnapshot {
            version: self.version,
            rules: self.to_vec(),
        }
    }

    /// Assigns a fresh id to `rule` and places it immediately before `anchor`, or at
    /// the end when `anchor` is `None`. Any id already on `rule` is discarded.
    ///
    /// # Errors
    ///
    /// Fails with a validation error for an invalid rule or a full list, and with
    /// not-found if `anchor` names no rule.
    pub fn insert_before(&mut self, mut rule: R, anchor: Option<RuleId>) -> Result<R> {
        rule.validate()?;
        check_capacity::<R>(self.len() + 1)?;
        let index = match anchor {
            Some(anchor) => self.anchor_index(anchor)?,
            None => self.order.len(),
        };

        let id = self.allocate_id()?;
        rule.set_id(id);
        self.order.insert(index, id);
        self.entries.insert(id, rule.clone());
        self.version += 1;

        tracing::debug!("Inserted {} {} at position {}", R::KIND, id, index);
        Ok(rule)
    }

    /// Replaces the content of rule `id`. With an anchor, the rule also moves to
    /// immediately before the anchor; an anchor equal to `id` keeps the position.
    ///
    /// # Errors
    ///
    /// Fails with a validation error for an invalid rule, and with not-found if `id`
    /// or `anchor` names no rule.
    pub fn replace(&mut self, id: RuleId, mut rule: R, anchor: Option<RuleId>) -> Result<R> {
        rule.validate()?;
        if !self.contains(id) {
            return Err(Error::not_found(R::KIND.to_string(), id));
        }
        let anchor = anchor.filter(|anchor| *anchor != id);
        if let Some(anchor) = anchor
            && !self.contains(anchor)
        {
            return Err(Error::not_found(format!("anchor {}", R::KIND), anchor));
        }

        rule.set_id(id);
        self.entries.insert(id, rule.clone());

        if let Some(anchor) = anchor {
            self.order.retain(|candidate| *candidate != id);
            let index = self.anchor_index(anchor)?;
            self.order.insert(index, id);
        }
        self.version += 1;

        tracing::debug!("Replaced {} {}", R::KIND, id);
        Ok(rule)
    }

    /// Removes rule `id`. Other ids are untouched; nothing is renumbered.
    ///
    /// # Errors
    ///
    /// Fails with not-found if `id` names no rule.
    pub fn delete(&mut self, id: RuleId) -> Result<R> {
        let rule = self
            .entries
            .remove(&id)
            .ok_or_else(|| Error::not_found(R::KIND.to_string(), id))?;
        self.order.retain(|candidate| *candidate != id);
        self.version += 1;

        tracing::debug!("Deleted {} {}", R::KIND, id);
        Ok(rule)
    }

    /// First rule in evaluation order matching the given source and destination.
    pub fn first_match(
        &self,
        src: IpAddr,
        dst: IpAddr,
        resolver: &dyn AddressSetResolver,
    ) -> Option<&R> {
        self.iter().find(|rule| rule.matches(src, dst, resolver))
    }

    /// Checks the arena and order vector agree. Exposed for tests and state loading.
    pub fn is_consistent(&self) -> bool {
        let unique: HashSet<_> = self.order.iter().collect();
        unique.len() == self.order.len()
            && self.order.len() == self.entries.len()
            && self.order.iter().all(|id| {
                self.entries.get(id).and_then(|rule| rule.id()) == Some(*id)
                    && id.0 < self.next_id
            })
    }

    fn anchor_index(&self, anchor: RuleId) -> Result<usize> {
        self.position(anchor)
            .ok_or_else(|| Error::not_found(format!("anchor {}", R::KIND), anchor))
    }

    fn allocate_id(&mut self) -> Result<RuleId> {
        let id = RuleId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or_else(|| {
            Error::validation("id", format!("{} ids are exhausted", R::KIND))
        })?;
        Ok(id)
    }
}

fn check_capacity<R: Entry>(count: usize) -> Result<()> {
    if count > MAX_RULES {
        return Err(Error::validation(
            "rules",
            format!("{} list would hold {count} rules (max: {MAX_RULES})", R::KIND),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::{AddressSpec, Unresolved};
    use crate::core::policy::{Action, Policy};
    use crate::core::test_helpers::{ids_of, list_of, policy};

    #[test]
    fn test_insert_before_anchor_scenario() {
        let mut list = list_of(&[Action::Accept, Action::Drop]);
        let created = list
            .insert_before(policy(Action::Drop), Some(RuleId(2)))
            .unwrap();
        assert_eq!(created.id, Some(RuleId(3)));
        assert_eq!(ids_of(&list), vec![1, 3, 2]);
        assert_eq!(list.get(RuleId(3)).unwrap().action, Action::Drop);
    }

    #[test]
    fn test_replace_with_move_scenario() {
        let mut list = list_of(&[Action::Accept, Action::Drop]);
        list.insert_before(policy(Action::Drop), Some(RuleId(2)))
            .unwrap();

        list.replace(RuleId(2), policy(Action::Accept), Some(RuleId(1)))
            .unwrap();
        assert_eq!(ids_of(&list), vec![2, 1, 3]);
        assert_eq!(list.get(RuleId(2)).unwrap().action, Action::Accept);
    }

    #[test]
    fn test_delete_missing_leaves_list_unchanged() {
        let mut list = list_of(&[Action::Accept, Action::Drop]);
        let version = list.version();
        let err = list.delete(RuleId(99)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(ids_of(&list), vec![1, 2]);
        assert_eq!(list.version(), version);
    }

    #[test]
    fn test_insert_null_anchor_appends() {
        let mut list = list_of(&[Action::Accept]);
        list.insert_before(policy(Action::Drop), None).unwrap();
        assert_eq!(ids_of(&list), vec![1, 2]);
    }

    #[test]
    fn test_insert_unknown_anchor_fails_without_consuming_id() {
        let mut list = list_of(&[Action::Accept]);
        let err = list
            .insert_before(policy(Action::Drop), Some(RuleId(42)))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(list.len(), 1);
        assert_eq!(list.next_id(), 2);
    }

    #[test]
    fn test_insert_ignores_incoming_id() {
        let mut list = list_of(&[Action::Accept]);
        let mut rule = policy(Action::Drop);
        rule.id = Some(RuleId(1));
        let created = list.insert_before(rule, None).unwrap();
        assert_eq!(created.id, Some(RuleId(2)));
        assert!(list.is_consistent());
    }

    #[test]
    fn test_insert_invalid_rule_rejected() {
        let mut list = list_of(&[Action::Accept]);
        let rule = Policy {
            source: AddressSpec::Literal(vec![]),
            ..Policy::default()
        };
        assert!(matches!(
            list.insert_before(rule, None),
            Err(Error::Validation { .. })
        ));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_replace_without_anchor_keeps_position() {
        let mut list = list_of(&[Action::Accept, Action::Accept, Action::Accept]);
        list.replace(RuleId(2), policy(Action::Drop), None).unwrap();
        assert_eq!(ids_of(&list), vec![1, 2, 3]);
    }

    #[test]
    fn test_replace_self_anchor_keeps_position() {
        let mut list = list_of(&[Action::Accept, Action::Accept, Action::Accept]);
        list.replace(RuleId(2), policy(Action::Drop), Some(RuleId(2)))
            .unwrap();
        assert_eq!(ids_of(&list), vec![1, 2, 3]);
    }

    #[test]
    fn test_replace_moves_down() {
        let mut list = list_of(&[Action::Accept, Action::Accept, Action::Accept]);
        list.replace(RuleId(1), policy(Action::Drop), Some(RuleId(3)))
            .unwrap();
        assert_eq!(ids_of(&list), vec![2, 1, 3]);
    }

    #[test]
    fn test_replace_uses_path_id() {
        let mut list = list_of(&[Action::Accept, Action::Accept]);
        let mut rule = policy(Action::Drop);
        rule.id = Some(RuleId(77));
        let stored = list.replace(RuleId(1), rule, None).unwrap();
        assert_eq!(stored.id, Some(RuleId(1)));
        assert!(list.get(RuleId(77)).is_none());
    }

    #[test]
    fn test_replace_unknown_anchor_is_atomic() {
        let mut list = list_of(&[Action::Accept, Action::Accept]);
        let err = list
            .replace(RuleId(1), policy(Action::Drop), Some(RuleId(9)))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(list.get(RuleId(1)).unwrap().action, Action::Accept);
    }

    #[test]
    fn test_deleted_ids_are_not_reused() {
        let mut list = list_of(&[Action::Accept, Action::Accept]);
        list.delete(RuleId(2)).unwrap();
        let created = list.insert_before(policy(Action::Drop), None).unwrap();
        assert_eq!(created.id, Some(RuleId(3)));
    }

    #[test]
    fn test_version_increments_on_success_only() {
        let mut list = list_of(&[]);
        assert_eq!(list.version(), 0);
        list.insert_before(policy(Action::Accept), None).unwrap();
        list.replace(RuleId(1), policy(Action::Drop), None).unwrap();
        let _ = list.delete(RuleId(5));
        list.delete(RuleId(1)).unwrap();
        assert_eq!(list.version(), 3);
    }

    #[test]
    fn test_from_parts_rejects_duplicates_and_missing_ids() {
        let mut a = policy(Action::Accept);
        a.id = Some(RuleId(4));
        let b = a.clone();
        assert!(OrderedRuleList::from_parts(vec![a.clone(), b], 1, 0).is_err());
        assert!(OrderedRuleList::from_parts(vec![policy(Action::Drop)], 1, 0).is_err());

        let list = OrderedRuleList::from_parts(vec![a], 1, 7).unwrap();
        assert_eq!(list.next_id(), 5);
        assert_eq!(list.version(), 7);
    }

    #[test]
    fn test_id_space_exhaustion_is_an_error() {
        let mut last = policy(Action::Accept);
        last.id = Some(RuleId(u64::MAX));
        let err = OrderedRuleList::from_parts(vec![last], 1, 0).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let mut near = policy(Action::Accept);
        near.id = Some(RuleId(u64::MAX - 1));
        let mut list = OrderedRuleList::from_parts(vec![near], u64::MAX, 3).unwrap();
        assert!(list.insert_before(policy(Action::Drop), None).is_err());
        assert_eq!(list.len(), 1);
        assert_eq!(list.version(), 3);
    }

    #[test]
    fn test_from_unassigned_reassigns_in_order() {
        let mut first = policy(Action::Drop);
        first.id = Some(RuleId(40));
        let mut second = policy(Action::Accept);
        second.id = Some(RuleId(10));
        let list = OrderedRuleList::from_unassigned(vec![first, second], 2).unwrap();
        assert_eq!(ids_of(&list), vec![1, 2]);
        assert_eq!(list.get(RuleId(1)).unwrap().action, Action::Drop);
    }

    #[test]
    fn test_capacity_limit() {
        let rules = vec![policy(Action::Accept); MAX_RULES];
        let mut list = OrderedRuleList::from_unassigned(rules, 0).unwrap();
        assert!(matches!(
            list.insert_before(policy(Action::Accept), None),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_first_match_respects_order() {
        let mut list = list_of(&[]);
        let narrow = Policy {
            source: AddressSpec::Literal(vec!["10.0.0.5".into()]),
            action: Action::Drop,
            ..Policy::default()
        };
        list.insert_before(narrow, None).unwrap();
        list.insert_before(policy(Action::Accept), None).unwrap();

        let dst = "192.0.2.1".parse().unwrap();
        let hit = list
            .first_match("10.0.0.5".parse().unwrap(), dst, &Unresolved)
            .unwrap();
        assert_eq!(hit.action, Action::Drop);
        let hit = list
            .first_match("10.0.0.6".parse().unwrap(), dst, &Unresolved)
            .unwrap();
        assert_eq!(hit.action, Action::Accept);

        // Moving the catch-all first shadows the narrow rule
        list.replace(RuleId(2), policy(Action::Accept), Some(RuleId(1)))
            .unwrap();
        let hit = list
            .first_match("10.0.0.5".parse().unwrap(), dst, &Unresolved)
            .unwrap();
        assert_eq!(hit.action, Action::Accept);
    }
}
