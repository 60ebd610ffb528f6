//! Address specifications used by rule match criteria
//!
//! An [`AddressSpec`] is one of three variants:
//!
//! - [`AddressSpec::Any`] matches every address. On the wire it is JSON `null`.
//! - [`AddressSpec::Literal`] is an ordered, non-empty list of address entries. On the
//!   wire it is a JSON array of strings. Each entry is an [`AddressRange`]: a host, a
//!   CIDR network, or an inclusive `first-last` interval.
//! - [`AddressSpec::NamedSet`] references an address set managed elsewhere. On the wire
//!   it is a JSON string.
//!
//! The variant is decided exactly once, when a JSON value is classified at the
//! deserialization boundary. Nothing downstream re-inspects the raw shape.
//!
//! # Example
//!
//! ```
//! use ordfw::core::address::AddressSpec;
//! use serde_json::json;
//!
//! let spec = AddressSpec::classify(&json!(["10.0.0.1", "10.0.0.0/24"])).unwrap();
//! assert_eq!(spec.render(), "10.0.0.1, 10.0.0.0/24");
//! assert_eq!(AddressSpec::classify(&json!(null)).unwrap(), AddressSpec::Any);
//! ```

use crate::core::error::{Error, Result};
use crate::validators::validate_set_name;
use ipnetwork::IpNetwork;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

/// One parsed literal address entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRange {
    /// A single host address, e.g. `10.0.0.1`
    Host(IpAddr),
    /// A CIDR network, e.g. `192.168.1.0/24`
    Network(IpNetwork),
    /// An inclusive interval, e.g. `192.168.6.0-192.168.6.120`
    Interval { first: IpAddr, last: IpAddr },
}

impl AddressRange {
    /// First address covered by this entry.
    pub fn first(&self) -> IpAddr {
        match self {
            AddressRange::Host(ip) => *ip,
            AddressRange::Network(net) => net.network(),
            AddressRange::Interval { first, .. } => *first,
        }
    }

    /// Last address covered by this entry (the broadcast address for networks).
    pub fn last(&self) -> IpAddr {
        match self {
            AddressRange::Host(ip) => *ip,
            AddressRange::Network(IpNetwork::V4(net)) => IpAddr::V4(net.broadcast()),
            AddressRange::Network(IpNetwork::V6(net)) => {
                let base = u128::from(net.network());
                let host_bits = !u128::from(net.mask());
                IpAddr::V6(Ipv6Addr::from(base | host_bits))
            }
            AddressRange::Interval { last, .. } => *last,
        }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match self {
            AddressRange::Host(ip) => *ip == addr,
            AddressRange::Network(net) => net.contains(addr),
            AddressRange::Interval { first, last } => {
                first.is_ipv4() == addr.is_ipv4() && *first <= addr && addr <= *last
            }
        }
    }
}

impl FromStr for AddressRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Address cannot be empty".to_string());
        }

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(AddressRange::Host(ip));
        }

        if s.contains('/') {
            return s
                .parse::<IpNetwork>()
                .map(AddressRange::Network)
                .map_err(|e| format!("Invalid network '{s}': {e}"));
        }

        if let Some((first, last)) = s.split_once('-') {
            let first: IpAddr = first
                .trim()
                .parse()
                .map_err(|_| format!("Invalid interval start in '{s}'"))?;
            let last: IpAddr = last
                .trim()
                .parse()
                .map_err(|_| format!("Invalid interval end in '{s}'"))?;
            if first.is_ipv4() != last.is_ipv4() {
                return Err(format!("Interval '{s}' mixes IPv4 and IPv6"));
            }
            if first > last {
                return Err(format!("Interval '{s}' starts after it ends"));
            }
            return Ok(AddressRange::Interval { first, last });
        }

        Err(format!("'{s}' is not an address, network or interval"))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressRange::Host(ip) => write!(f, "{ip}"),
            AddressRange::Network(net) => write!(f, "{net}"),
            AddressRange::Interval { first, last } => write!(f, "{first}-{last}"),
        }
    }
}

/// Discriminant of an [`AddressSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum AddressSpecKind {
    #[strum(serialize = "any")]
    Any,
    #[strum(serialize = "literal")]
    Literal,
    #[strum(serialize = "named set")]
    NamedSet,
}

/// Looks up named address sets when a [`AddressSpec::NamedSet`] has to be matched.
///
/// Returns `None` when the set is unknown.
pub trait AddressSetResolver {
    fn set_contains(&self, name: &str, addr: IpAddr) -> Option<bool>;
}

/// Resolver that knows no sets; named references never match through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unresolved;

impl AddressSetResolver for Unresolved {
    fn set_contains(&self, _name: &str, _addr: IpAddr) -> Option<bool> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AddressSpec {
    #[default]
    Any,
    Literal(Vec<String>),
    NamedSet(String),
}

impl AddressSpec {
    /// Decides which variant a raw JSON value represents.
    ///
    /// `null` is [`Any`](AddressSpec::Any), an array is a
    /// [`Literal`](AddressSpec::Literal) with each entry trimmed, a string is a
    /// [`NamedSet`](AddressSpec::NamedSet).
    ///
    /// # Errors
    ///
    /// Returns a validation error for any other JSON shape, or for an array with
    /// non-string members.
    pub fn classify(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(AddressSpec::Any),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(|entry| entry.trim().to_string()).ok_or_else(|| {
                        Error::validation("address", format!("entry {item} is not a string"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(AddressSpec::Literal),
            Value::String(name) => Ok(AddressSpec::NamedSet(name.clone())),
            other => Err(Error::validation(
                "address",
                format!("expected null, an array or a string, got {other}"),
            )),
        }
    }

    pub fn kind(&self) -> AddressSpecKind {
        match self {
            AddressSpec::Any => AddressSpecKind::Any,
            AddressSpec::Literal(_) => AddressSpecKind::Literal,
            AddressSpec::NamedSet(_) => AddressSpecKind::NamedSet,
        }
    }

    /// Human-readable summary: `Any`, comma-joined entries, or the set name.
    pub fn render(&self) -> String {
        match self {
            AddressSpec::Any => "Any".to_string(),
            AddressSpec::Literal(entries) => entries.join(", "),
            AddressSpec::NamedSet(name) => name.clone(),
        }
    }

    /// Parses the rendered form of a literal back into a [`AddressSpec::Literal`].
    ///
    /// # Errors
    ///
    /// Returns a validation error if the text holds no entries.
    pub fn parse_rendered_literal(text: &str) -> Result<Self> {
        let entries: Vec<String> = text
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();

        if entries.is_empty() {
            return Err(Error::validation("address", "literal list is empty"));
        }
        Ok(AddressSpec::Literal(entries))
    }

    /// Returns a copy of this literal with `address` appended.
    ///
    /// # Errors
    ///
    /// Fails if `address` is blank, if the literal already holds a blank entry, or if
    /// `self` is not a literal.
    pub fn add(&self, address: &str) -> Result<Self> {
        let AddressSpec::Literal(entries) = self else {
            return Err(Error::validation(
                "address",
                format!("cannot add an entry to a {} address", self.kind()),
            ));
        };
        if entries.iter().any(|entry| entry.trim().is_empty()) {
            return Err(Error::validation("address", "address list holds a blank entry"));
        }

        let address = address.trim();
        if address.is_empty() {
            return Err(Error::validation("address", "address cannot be blank"));
        }

        let mut entries = entries.clone();
        entries.push(address.to_string());
        Ok(AddressSpec::Literal(entries))
    }

    /// Returns a copy of this literal without the entry at `index`.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of bounds, if it would leave the literal empty, or if
    /// `self` is not a literal.
    pub fn remove(&self, index: usize) -> Result<Self> {
        let AddressSpec::Literal(entries) = self else {
            return Err(Error::validation(
                "address",
                format!("cannot remove an entry from a {} address", self.kind()),
            ));
        };

        if index >= entries.len() {
            return Err(Error::validation(
                "index",
                format!("index {index} out of bounds for {} entries", entries.len()),
            ));
        }

        if entries.len() == 1 {
            return Err(Error::validation(
                "address",
                "cannot remove the last entry; use Any instead",
            ));
        }

        let mut entries = entries.clone();
        entries.remove(index);
        Ok(AddressSpec::Literal(entries))
    }

    /// Checks that the spec is well formed. `field` names the rule field in errors.
    ///
    /// # Errors
    ///
    /// Fails on an empty literal, a padded or unparsable literal entry, or an invalid
    /// set name.
    pub fn validate(&self, field: &str) -> Result<()> {
        match self {
            AddressSpec::Any => Ok(()),
            AddressSpec::Literal(entries) => {
                if entries.is_empty() {
                    return Err(Error::validation(field, "address list cannot be empty"));
                }
                for entry in entries {
                    if entry.trim() != entry {
                        return Err(Error::validation(
                            field,
                            format!("'{entry}' has surrounding whitespace"),
                        ));
                    }
                    entry
                        .parse::<AddressRange>()
                        .map_err(|message| Error::validation(field, message))?;
                }
                Ok(())
            }
            AddressSpec::NamedSet(name) => {
                validate_set_name(name).map_err(|message| Error::validation(field, message))
            }
        }
    }

    /// Parsed literal entries. Unparsable entries are skipped; call
    /// [`validate`](Self::validate) first to reject them.
    pub fn ranges(&self) -> Vec<AddressRange> {
        match self {
            AddressSpec::Literal(entries) => entries
                .iter()
                .filter_map(|entry| entry.parse().ok())
                .collect(),
            AddressSpec::Any | AddressSpec::NamedSet(_) => Vec::new(),
        }
    }

    pub fn named_set(&self) -> Option<&str> {
        match self {
            AddressSpec::NamedSet(name) => Some(name),
            AddressSpec::Any | AddressSpec::Literal(_) => None,
        }
    }

    /// Whether `addr` is covered by this spec.
    ///
    /// Literal matching is set membership: order and duplicates are irrelevant.
    /// Named sets are answered by `resolver`; an unknown set never matches.
    pub fn matches(&self, addr: IpAddr, resolver: &dyn AddressSetResolver) -> bool {
        match self {
            AddressSpec::Any => true,
            AddressSpec::Literal(_) => self.ranges().iter().any(|range| range.contains(addr)),
            AddressSpec::NamedSet(name) => resolver.set_contains(name, addr).unwrap_or(false),
        }
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for AddressSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AddressSpec::Any => serializer.serialize_none(),
            AddressSpec::Literal(entries) => serializer.collect_seq(entries),
            AddressSpec::NamedSet(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for AddressSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        AddressSpec::classify(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_classify_scenarios() {
        assert_eq!(AddressSpec::classify(&json!(null)).unwrap(), AddressSpec::Any);
        assert_eq!(
            AddressSpec::classify(&json!(["10.0.0.1", "10.0.0.2"])).unwrap(),
            AddressSpec::Literal(vec!["10.0.0.1".into(), "10.0.0.2".into()])
        );
        assert_eq!(
            AddressSpec::classify(&json!("office-net")).unwrap(),
            AddressSpec::NamedSet("office-net".into())
        );
    }

    #[test]
    fn test_classify_rejects_other_shapes() {
        assert!(AddressSpec::classify(&json!(42)).is_err());
        assert!(AddressSpec::classify(&json!({"ipset": "x"})).is_err());
        assert!(AddressSpec::classify(&json!(["10.0.0.1", 7])).is_err());
    }

    #[test]
    fn test_render() {
        assert_eq!(AddressSpec::Any.render(), "Any");
        assert_eq!(
            AddressSpec::Literal(vec!["10.0.0.1".into(), "10.0.0.0/8".into()]).render(),
            "10.0.0.1, 10.0.0.0/8"
        );
        assert_eq!(AddressSpec::NamedSet("servers".into()).render(), "servers");
    }

    #[test]
    fn test_serde_wire_shapes() {
        assert_eq!(serde_json::to_value(AddressSpec::Any).unwrap(), json!(null));
        assert_eq!(
            serde_json::to_value(AddressSpec::Literal(vec!["1.2.3.4".into()])).unwrap(),
            json!(["1.2.3.4"])
        );
        assert_eq!(
            serde_json::to_value(AddressSpec::NamedSet("lan".into())).unwrap(),
            json!("lan")
        );

        let parsed: AddressSpec = serde_json::from_value(json!("lan")).unwrap();
        assert_eq!(parsed.kind(), AddressSpecKind::NamedSet);
        assert!(serde_json::from_value::<AddressSpec>(json!(true)).is_err());
    }

    #[test]
    fn test_add_appends_and_rejects_blank() {
        let spec = AddressSpec::Literal(vec!["10.0.0.1".into()]);
        let added = spec.add(" 10.0.0.2 ").unwrap();
        assert_eq!(
            added,
            AddressSpec::Literal(vec!["10.0.0.1".into(), "10.0.0.2".into()])
        );
        // Original is untouched
        assert_eq!(spec.render(), "10.0.0.1");

        assert!(spec.add("   ").is_err());
        assert!(AddressSpec::Any.add("10.0.0.1").is_err());
    }

    #[test]
    fn test_add_rejects_literal_holding_blank_entry() {
        let spec = AddressSpec::Literal(vec!["10.0.0.1".into(), "  ".into()]);
        assert!(spec.add("10.0.0.2").is_err());
    }

    #[test]
    fn test_padded_entries_are_normalized() {
        let spec = AddressSpec::classify(&json!([" 10.0.0.1", "10.0.0.2 "])).unwrap();
        assert_eq!(
            spec,
            AddressSpec::Literal(vec!["10.0.0.1".into(), "10.0.0.2".into()])
        );
        assert!(spec.validate("source").is_ok());
        assert_eq!(
            AddressSpec::parse_rendered_literal(&spec.render()).unwrap(),
            spec
        );

        // Built directly, bypassing classify
        let padded = AddressSpec::Literal(vec![" 10.0.0.1".into()]);
        assert!(padded.validate("source").is_err());
    }

    #[test]
    fn test_add_permits_duplicates() {
        let spec = AddressSpec::Literal(vec!["10.0.0.1".into()]);
        let added = spec.add("10.0.0.1").unwrap();
        assert_eq!(added.render(), "10.0.0.1, 10.0.0.1");
    }

    #[test]
    fn test_remove_by_index() {
        let spec = AddressSpec::Literal(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(spec.remove(1).unwrap().render(), "a, c");

        let err = spec.remove(3).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "index"));

        let single = AddressSpec::Literal(vec!["a".into()]);
        assert!(single.remove(0).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(AddressSpec::Any.validate("source").is_ok());
        assert!(
            AddressSpec::Literal(vec![
                "10.0.0.1".into(),
                "192.168.1.0/24".into(),
                "192.168.6.0-192.168.6.120".into(),
                "2001:db8::1".into(),
            ])
            .validate("source")
            .is_ok()
        );
        assert!(AddressSpec::Literal(vec![]).validate("source").is_err());
        assert!(
            AddressSpec::Literal(vec!["not-an-ip".into()])
                .validate("destination")
                .is_err()
        );
        assert!(AddressSpec::NamedSet("bad name".into()).validate("source").is_err());
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!(
            "10.0.0.1".parse::<AddressRange>().unwrap(),
            AddressRange::Host(ip("10.0.0.1"))
        );
        assert!(matches!(
            "10.0.0.0/8".parse::<AddressRange>().unwrap(),
            AddressRange::Network(_)
        ));
        assert!(matches!(
            "10.0.0.1 - 10.0.0.9".parse::<AddressRange>().unwrap(),
            AddressRange::Interval { .. }
        ));
        assert!("10.0.0.9-10.0.0.1".parse::<AddressRange>().is_err());
        assert!("10.0.0.1-::1".parse::<AddressRange>().is_err());
        assert!("".parse::<AddressRange>().is_err());
        assert!("10.0.0.0/33".parse::<AddressRange>().is_err());
    }

    #[test]
    fn test_range_bounds() {
        let net: AddressRange = "192.168.1.0/24".parse().unwrap();
        assert_eq!(net.first(), ip("192.168.1.0"));
        assert_eq!(net.last(), ip("192.168.1.255"));

        let all: AddressRange = "0.0.0.0/0".parse().unwrap();
        assert_eq!(all.last(), ip("255.255.255.255"));

        let v6: AddressRange = "2001:db8::/64".parse().unwrap();
        assert_eq!(v6.last(), ip("2001:db8::ffff:ffff:ffff:ffff"));
    }

    #[test]
    fn test_range_contains() {
        let interval: AddressRange = "192.168.6.0-192.168.6.120".parse().unwrap();
        assert!(interval.contains(ip("192.168.6.0")));
        assert!(interval.contains(ip("192.168.6.120")));
        assert!(!interval.contains(ip("192.168.6.121")));
        assert!(!interval.contains(ip("::1")));

        let net: AddressRange = "10.255.255.0/24".parse().unwrap();
        assert!(net.contains(ip("10.255.255.7")));
        assert!(!net.contains(ip("11.0.0.0")));
    }

    struct OneSet;

    impl AddressSetResolver for OneSet {
        fn set_contains(&self, name: &str, addr: IpAddr) -> Option<bool> {
            (name == "servers").then(|| addr == "10.1.1.1".parse::<IpAddr>().unwrap())
        }
    }

    #[test]
    fn test_matches_variants() {
        assert!(AddressSpec::Any.matches(ip("8.8.8.8"), &Unresolved));

        let literal = AddressSpec::Literal(vec!["10.0.0.2".into(), "10.0.0.1".into()]);
        assert!(literal.matches(ip("10.0.0.1"), &Unresolved));
        assert!(!literal.matches(ip("10.0.0.3"), &Unresolved));

        let named = AddressSpec::NamedSet("servers".into());
        assert!(named.matches(ip("10.1.1.1"), &OneSet));
        assert!(!named.matches(ip("10.1.1.2"), &OneSet));
        assert!(!named.matches(ip("10.1.1.1"), &Unresolved));
        assert!(!AddressSpec::NamedSet("unknown".into()).matches(ip("10.1.1.1"), &OneSet));
    }
}
