//! Access-control policies
//!
//! A [`Policy`] matches traffic by source and destination address and decides
//! [`Action::Accept`] or [`Action::Drop`], optionally logging the match.
//!
//! # Example
//!
//! ```
//! use ordfw::core::policy::{Action, Policy};
//! use ordfw::core::address::AddressSpec;
//!
//! let policy = Policy {
//!     source: AddressSpec::Literal(vec!["10.0.0.0/8".into()]),
//!     action: Action::Drop,
//!     ..Policy::default()
//! };
//! assert!(policy.id.is_none());
//! assert!(policy.validate().is_ok());
//! ```

use super::address::AddressSpec;
use super::rule::{Entry, RuleId, RuleKind};
use crate::core::error::{Error, Result};
use crate::validators::{validate_description, validate_label};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict applied to matching traffic
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
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Action {
    /// Let the packet through
    #[default]
    #[strum(serialize = "accept")]
    Accept,
    /// Discard the packet silently
    #[strum(serialize = "drop")]
    Drop,
}

impl Action {
    /// Returns display name for tables and CLI output
    pub const fn display_name(self) -> &'static str {
        match self {
            Action::Accept => "Accept",
            Action::Drop => "Drop",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: AddressSpec,
    #[serde(default)]
    pub destination: AddressSpec,
    #[serde(default)]
    pub action: Action,
    /// Record matching traffic
    #[serde(default)]
    pub log: bool,
}

impl Entry for Policy {
    const KIND: RuleKind = RuleKind::Policy;

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
        Policy::validate(self)
    }
}

impl Policy {
    /// Validates names and address criteria. The action is already constrained by
    /// its type; unknown action strings are rejected while deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        validate_label(&self.name).map_err(|message| Error::validation("name", message))?;
        validate_description(&self.description)
            .map_err(|message| Error::validation("description", message))?;
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        Ok(())
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "#{id:<4}")?,
            None => write!(f, "#new ")?,
        }
        write!(
            f,
            " {:<6} {} -> {}",
            self.action.display_name(),
            self.source,
            self.destination
        )?;
        if self.log {
            write!(f, " [log]")?;
        }
        if !self.name.is_empty() {
            write!(f, " ({})", self.name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_unsaved_accept_any_any() {
        let policy = Policy::default();
        assert_eq!(policy.id, None);
        assert_eq!(policy.source, AddressSpec::Any);
        assert_eq!(policy.destination, AddressSpec::Any);
        assert_eq!(policy.action, Action::Accept);
        assert!(!policy.log);
    }

    #[test]
    fn test_deserialize_minimal_body() {
        let policy: Policy = serde_json::from_value(json!({"action": "drop"})).unwrap();
        assert_eq!(policy.action, Action::Drop);
        assert_eq!(policy.source, AddressSpec::Any);
        assert_eq!(policy.id, None);
    }

    #[test]
    fn test_deserialize_rejects_unknown_action() {
        let result = serde_json::from_value::<Policy>(json!({"action": "reject"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_wire_shape() {
        let policy = Policy {
            id: Some(RuleId(3)),
            source: AddressSpec::Literal(vec!["10.0.0.1".into()]),
            destination: AddressSpec::NamedSet("servers".into()),
            action: Action::Drop,
            log: true,
            ..Policy::default()
        };
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["source"], json!(["10.0.0.1"]));
        assert_eq!(value["destination"], "servers");
        assert_eq!(value["action"], "drop");
        assert_eq!(value["log"], true);
    }

    #[test]
    fn test_unsaved_policy_omits_id() {
        let value = serde_json::to_value(Policy::default()).unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_addresses() {
        let policy = Policy {
            destination: AddressSpec::Literal(vec!["300.0.0.1".into()]),
            ..Policy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "destination"));
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let policy = Policy {
            name: "allow; rm -rf".into(),
            ..Policy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_identity_is_by_id() {
        let a = Policy {
            id: Some(RuleId(1)),
            action: Action::Accept,
            ..Policy::default()
        };
        let b = Policy {
            id: Some(RuleId(1)),
            action: Action::Drop,
            ..Policy::default()
        };
        let unsaved = Policy::default();
        assert!(a.same_entity(&b));
        assert!(!unsaved.same_entity(&Policy::default()));
    }

    #[test]
    fn test_action_parse_case_insensitive() {
        assert_eq!("DROP".parse::<Action>().unwrap(), Action::Drop);
        assert_eq!("accept".parse::<Action>().unwrap(), Action::Accept);
        assert!("reject".parse::<Action>().is_err());
    }

    #[test]
    fn test_display_summary() {
        let policy = Policy {
            id: Some(RuleId(2)),
            action: Action::Drop,
            log: true,
            ..Policy::default()
        };
        let text = policy.to_string();
        assert!(text.contains("Drop"));
        assert!(text.contains("Any -> Any"));
        assert!(text.contains("[log]"));
    }
}
