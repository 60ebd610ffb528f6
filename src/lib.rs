//! ordfw - ordered firewall policy store
//!
//! Maintains an ordered list of filtering policies and an ordered list of source NAT
//! rules, each rule matching traffic by source and destination address criteria.
//! Evaluation order is significant, so every edit is expressed relative to an anchor
//! rule ("insert before", "move before") rather than by position.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, ordered lists, the rule store, export and persistence
//! - [`api`] - Request dispatcher implementing the REST contract over the store
//! - [`client`] - Client over any transport, plus the stale-result aware list view
//! - [`conntrack`] - Connection tracking telemetry snapshots
//! - [`audit`] - Audit logging for every mutation
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Configuration persistence
//! - [`utils`] - Per-user directories and display helpers
//!
//! # Guarantees
//!
//! - Rule ids are stable and never reused within a list
//! - Every mutation is all-or-nothing
//! - The policy list and the NAT list are independent serialization domains
//! - Atomic state writes with secure permissions and a SHA-256 sidecar

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod audit;
pub mod client;
pub mod config;
pub mod conntrack;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use api::{Api, ApiRequest, ApiResponse, Method};
pub use client::{RuleClient, RuleListView, Transport};
pub use core::address::AddressSpec;
pub use core::error::{Error, ErrorKind, Result};
pub use core::nat::{NatRule, NatTarget};
pub use core::policy::{Action, Policy};
pub use core::rule::RuleId;
pub use core::store::RuleStore;
