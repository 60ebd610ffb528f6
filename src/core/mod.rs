//! Core rule model and store
//!
//! This module contains the types and logic for ordered policy and NAT rule lists.
//! It provides:
//!
//! - [`address`]: Address criteria (`Any`, literal ranges, named sets)
//! - [`address_set`]: Named address sets referenced by rules
//! - [`rule`]: Rule ids and the [`rule::Entry`] trait shared by both rule kinds
//! - [`policy`] and [`nat`]: The two rule kinds
//! - [`ordered_list`]: Identity-stable ordered lists with insert-before/replace/delete
//! - [`store`]: The authoritative, concurrency-safe store
//! - [`export`]: Portable configuration documents
//! - [`persist`]: State file loading and atomic saving
//! - [`error`]: Error types shared across the crate

pub mod address;
pub mod address_set;
pub mod error;
pub mod export;
pub mod nat;
pub mod ordered_list;
pub mod persist;
pub mod policy;
pub mod rule;
pub mod store;

#[cfg(test)]
pub mod test_helpers;
