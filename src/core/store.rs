//! The authoritative rule store
//!
//! [`RuleStore`] owns the policy list, the NAT list and the named address sets. Each
//! of the three sits behind its own lock, so edits to the policy list never wait on
//! NAT edits and vice versa, while every edit to one list observes a consistent prior
//! order.
//!
//! Operations spanning several domains take the locks in a fixed order: policies,
//! then NAT, then address sets.
//!
//! Concurrent edits are last-writer-wins. A caller that wants stronger guarantees
//! passes the list version it last loaded as `expected_version`; the store then
//! rejects the edit with [`Error::Conflict`] if another edit landed in between.

use super::address::AddressSetResolver;
use super::address_set::{AddressSet, AddressSets};
use super::export::ConfigDocument;
use super::nat::NatRule;
use super::ordered_list::{ListSnapshot, OrderedRuleList};
use super::persist::{PersistedList, StoreState};
use super::policy::Policy;
use super::rule::{Entry, RuleId};
use crate::core::error::{Error, Result};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

/// A rule type the store keeps a list for.
pub trait StoredEntry: Entry {
    fn domain(store: &RuleStore) -> &Mutex<OrderedRuleList<Self>>;
}

impl StoredEntry for Policy {
    fn domain(store: &RuleStore) -> &Mutex<OrderedRuleList<Self>> {
        &store.policies
    }
}

impl StoredEntry for NatRule {
    fn domain(store: &RuleStore) -> &Mutex<OrderedRuleList<Self>> {
        &store.nat
    }
}

/// Result of a successful create or replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation<R> {
    pub rule: R,
    /// List version after the mutation
    pub version: u64,
}

#[derive(Debug, Default)]
pub struct RuleStore {
    policies: Mutex<OrderedRuleList<Policy>>,
    nat: Mutex<OrderedRuleList<NatRule>>,
    address_sets: Mutex<AddressSets>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rules of one list, in evaluation order.
    ///
    /// # Errors
    ///
    /// Fails only if the list lock was poisoned.
    pub fn load<R: StoredEntry>(&self) -> Result<ListSnapshot<R>> {
        Ok(lock(R::domain(self))?.snapshot())
    }

    /// # Errors
    ///
    /// Fails with not-found if `id` names no rule.
    pub fn get<R: StoredEntry>(&self, id: RuleId) -> Result<Mutation<R>> {
        let list = lock(R::domain(self))?;
        let rule = list
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(R::KIND.to_string(), id))?;
        Ok(Mutation {
            rule,
            version: list.version(),
        })
    }

    /// Inserts a new rule before `before`, or appends it.
    ///
    /// # Errors
    ///
    /// Validation, not-found (anchor) or conflict (`expected_version` mismatch).
    pub fn create<R: StoredEntry>(
        &self,
        rule: R,
        before: Option<RuleId>,
        expected_version: Option<u64>,
    ) -> Result<Mutation<R>> {
        let mut list = lock(R::domain(self))?;
        check_version(&list, expected_version)?;
        let rule = list.insert_before(rule, before)?;

        tracing::info!(
            "Created {} {} (before: {:?}, version {})",
            R::KIND,
            rule.id().map_or_else(String::new, |id| id.to_string()),
            before,
            list.version()
        );
        Ok(Mutation {
            rule,
            version: list.version(),
        })
    }

    /// Replaces rule `id`, optionally moving it before `before`.
    ///
    /// # Errors
    ///
    /// Validation, not-found (id or anchor) or conflict (`expected_version` mismatch).
    pub fn replace<R: StoredEntry>(
        &self,
        id: RuleId,
        rule: R,
        before: Option<RuleId>,
        expected_version: Option<u64>,
    ) -> Result<Mutation<R>> {
        let mut list = lock(R::domain(self))?;
        check_version(&list, expected_version)?;
        let rule = list.replace(id, rule, before)?;

        tracing::info!(
            "Replaced {} {} (before: {:?}, version {})",
            R::KIND,
            id,
            before,
            list.version()
        );
        Ok(Mutation {
            rule,
            version: list.version(),
        })
    }

    /// Deletes rule `id` and returns the new list version.
    ///
    /// # Errors
    ///
    /// Not-found or conflict (`expected_version` mismatch).
    pub fn delete<R: StoredEntry>(&self, id: RuleId, expected_version: Option<u64>) -> Result<u64> {
        let mut list = lock(R::domain(self))?;
        check_version(&list, expected_version)?;
        list.delete(id)?;

        tracing::info!("Deleted {} {} (version {})", R::KIND, id, list.version());
        Ok(list.version())
    }

    /// First rule of a list matching the given traffic, resolving named sets against
    /// the store's address sets.
    ///
    /// # Errors
    ///
    /// Fails only if a lock was poisoned.
    pub fn first_match<R: StoredEntry>(&self, src: IpAddr, dst: IpAddr) -> Result<Option<R>> {
        let list = lock(R::domain(self))?;
        let sets = lock(&self.address_sets)?;
        Ok(list
            .first_match(src, dst, &*sets as &dyn AddressSetResolver)
            .cloned())
    }

    /// # Errors
    ///
    /// Fails only if the lock was poisoned.
    pub fn address_sets(&self) -> Result<Vec<AddressSet>> {
        Ok(lock(&self.address_sets)?.values().cloned().collect())
    }

    /// # Errors
    ///
    /// Fails with not-found if no set has that name.
    pub fn address_set(&self, name: &str) -> Result<AddressSet> {
        lock(&self.address_sets)?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("address set", name))
    }

    /// Creates or replaces the set `name` with `members`.
    ///
    /// # Errors
    ///
    /// Fails with a validation error for a bad name or member.
    pub fn put_address_set(&self, name: &str, members: Vec<String>) -> Result<AddressSet> {
        let set = AddressSet::new(name, members)?;
        lock(&self.address_sets)?.insert(set.name.clone(), set.clone());

        tracing::info!(
            "Stored address set '{}' ({} members)",
            set.name,
            set.members.len()
        );
        Ok(set)
    }

    /// Removes the set `name`.
    ///
    /// # Errors
    ///
    /// Not-found if no such set, conflict if any rule still references it.
    pub fn delete_address_set(&self, name: &str) -> Result<AddressSet> {
        let policies = lock(&self.policies)?;
        let nat = lock(&self.nat)?;
        let mut sets = lock(&self.address_sets)?;

        if !sets.contains_key(name) {
            return Err(Error::not_found("address set", name));
        }

        let users: Vec<String> = policies
            .iter()
            .filter(|rule| rule.references_set(name))
            .filter_map(|rule| rule.id.map(|id| format!("policy {id}")))
            .chain(
                nat.iter()
                    .filter(|rule| rule.references_set(name))
                    .filter_map(|rule| rule.id.map(|id| format!("nat rule {id}"))),
            )
            .collect();
        if !users.is_empty() {
            return Err(Error::Conflict(format!(
                "address set '{name}' is referenced by {}",
                users.join(", ")
            )));
        }

        let removed = sets
            .remove(name)
            .ok_or_else(|| Error::not_found("address set", name))?;
        tracing::info!("Deleted address set '{}'", name);
        Ok(removed)
    }

    /// Snapshot of every list and address set.
    ///
    /// # Errors
    ///
    /// Fails only if a lock was poisoned.
    pub fn export(&self) -> Result<ConfigDocument> {
        let policies = lock(&self.policies)?;
        let nat = lock(&self.nat)?;
        let sets = lock(&self.address_sets)?;
        Ok(ConfigDocument::new(
            policies.to_vec(),
            nat.to_vec(),
            sets.values().cloned().collect(),
        ))
    }

    /// Replaces all lists and address sets with the document's content.
    ///
    /// Rule ids are reassigned from 1 in document order. Nothing changes unless the
    /// whole document is valid.
    ///
    /// # Errors
    ///
    /// Fails with a validation error on an unsupported format version, an invalid
    /// rule, an invalid or duplicated address set, or a list over the size limit.
    pub fn import(&self, document: ConfigDocument) -> Result<ConfigDocument> {
        document.check_format()?;

        let mut new_sets = AddressSets::new();
        for set in document.address_sets {
            set.validate()?;
            if new_sets.contains_key(&set.name) {
                return Err(Error::validation(
                    "address_sets",
                    format!("duplicate address set '{}'", set.name),
                ));
            }
            new_sets.insert(set.name.clone(), set);
        }

        let mut policies = lock(&self.policies)?;
        let mut nat = lock(&self.nat)?;
        let mut sets = lock(&self.address_sets)?;

        let new_policies = OrderedRuleList::from_unassigned(document.policies, policies.version() + 1)?;
        let new_nat = OrderedRuleList::from_unassigned(document.nat, nat.version() + 1)?;

        *policies = new_policies;
        *nat = new_nat;
        *sets = new_sets;

        tracing::info!(
            "Imported configuration: {} policies, {} nat rules, {} address sets",
            policies.len(),
            nat.len(),
            sets.len()
        );
        Ok(ConfigDocument::new(
            policies.to_vec(),
            nat.to_vec(),
            sets.values().cloned().collect(),
        ))
    }

    /// Persistable form of the whole store, including id counters and versions.
    ///
    /// # Errors
    ///
    /// Fails only if a lock was poisoned.
    pub fn to_state(&self) -> Result<StoreState> {
        let policies = lock(&self.policies)?;
        let nat = lock(&self.nat)?;
        let sets = lock(&self.address_sets)?;
        Ok(StoreState {
            policies: PersistedList::from_list(&policies),
            nat: PersistedList::from_list(&nat),
            address_sets: sets.values().cloned().collect(),
            ..StoreState::default()
        })
    }

    /// Rebuilds a store from persisted state.
    ///
    /// # Errors
    ///
    /// Fails if any list or set in the state is invalid.
    pub fn from_state(state: StoreState) -> Result<Self> {
        let mut sets = AddressSets::new();
        for set in state.address_sets {
            set.validate()?;
            sets.insert(set.name.clone(), set);
        }

        Ok(Self {
            policies: Mutex::new(state.policies.into_list()?),
            nat: Mutex::new(state.nat.into_list()?),
            address_sets: Mutex::new(sets),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("rule store lock poisoned".to_string()))
}

fn check_version<R: Entry>(list: &OrderedRuleList<R>, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != list.version() => Err(Error::Conflict(format!(
            "{} list is at version {}, request expected version {}",
            R::KIND,
            list.version(),
            expected
        ))),
        _ => Ok(()),
    }
}
