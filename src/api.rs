//! Request dispatcher for the rule store
//!
//! [`Api`] maps REST-shaped requests (`GET /policies`, `POST /nat?before=3`, ...) onto
//! [`RuleStore`] operations and renders the outcome as a status code plus JSON body.
//! It does no I/O of its own, so any transport (the CLI, an HTTP adapter, tests) can
//! drive it.
//!
//! # Routes
//!
//! All paths may carry the `/api/v1` prefix.
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | GET | `/policies`, `/nat` | ordered rules, list version |
//! | GET | `/policies/{id}`, `/nat/{id}` | one rule |
//! | POST | `/policies`, `/nat` (`?before=<id>`) | 201, created rule |
//! | PUT | `/policies/{id}`, `/nat/{id}` (`?before=<id>`) | updated rule |
//! | DELETE | `/policies/{id}`, `/nat/{id}` | 204 |
//! | GET | `/ipsets`, `/ipsets/{name}` | address sets |
//! | PUT | `/ipsets/{name}` | body is the member array |
//! | DELETE | `/ipsets/{name}` | 204, conflict while referenced |
//! | GET | `/export` | configuration document |
//! | POST | `/import` | replaces everything, returns the new document |
//! | GET | `/connections` | connection tracking snapshot |
//! | GET | `/interfaces` | host interface names |
//!
//! Mutations accept an optional `version=<n>` query; a mismatch with the list's
//! current version fails with 409.

use crate::conntrack::ConntrackReader;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::export::ConfigDocument;
use crate::core::nat::NatRule;
use crate::core::policy::Policy;
use crate::core::rule::RuleId;
use crate::core::store::{RuleStore, StoredEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Prefix stripped from incoming paths
pub const API_PREFIX: &str = "/api/v1";

const SYSFS_NET: &str = "/sys/class/net";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Method::Get)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Builds a request from a method and a target such as `/policies?before=2`.
    ///
    /// The target must already be percent-decoded; an HTTP adapter decodes it first.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key.to_string(), value.to_string())
            })
            .collect();

        Self {
            method,
            path: path.to_string(),
            query,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Path without the API prefix and trailing slashes.
    pub fn route(&self) -> &str {
        let path = self.path.strip_prefix(API_PREFIX).unwrap_or(&self.path);
        path.trim_end_matches('/')
    }

    fn query_id(&self, key: &str) -> Result<Option<RuleId>> {
        match self.query.get(key).map(|value| value.trim()) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                Error::validation(key, format!("'{value}' is not a rule id"))
            }),
        }
    }

    fn expected_version(&self) -> Result<Option<u64>> {
        match self.query.get("version").map(|value| value.trim()) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                Error::validation("version", format!("'{value}' is not a list version"))
            }),
        }
    }

    fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| Error::validation("body", "request body is required"))?;
        serde_json::from_value(body.clone()).map_err(|e| Error::validation("body", e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
    /// Version of the list the response refers to, when there is one
    pub version: Option<u64>,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
            version: None,
        }
    }

    pub fn created(body: Value) -> Self {
        Self {
            status: 201,
            ..Self::ok(body)
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
            version: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn from_error(error: &Error) -> Self {
        Self::failure(error.status_code(), error.kind(), error.to_string())
    }

    fn failure(status: u16, kind: ErrorKind, message: String) -> Self {
        let body = ErrorBody {
            ok: false,
            kind,
            message,
        };
        Self {
            status,
            body: serde_json::to_value(body).ok(),
            version: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub kind: ErrorKind,
    pub message: String,
}

pub struct Api {
    store: Arc<RuleStore>,
    conntrack: ConntrackReader,
}

impl Api {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self {
            store,
            conntrack: ConntrackReader::default(),
        }
    }

    pub fn with_conntrack(mut self, conntrack: ConntrackReader) -> Self {
        self.conntrack = conntrack;
        self
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Dispatches one request. Failures become error responses; this never panics
    /// on bad input.
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                if e.kind() == ErrorKind::Internal {
                    tracing::error!("{} {} failed: {}", request.method, request.path, e);
                } else {
                    tracing::debug!("{} {} rejected: {}", request.method, request.path, e);
                }
                ApiResponse::from_error(&e)
            }
        }
    }

    fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let route = request.route();
        let segments: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["policies"] => self.rule_collection::<Policy>(request),
            ["policies", id] => self.rule_member::<Policy>(request, id),
            ["nat"] => self.rule_collection::<NatRule>(request),
            ["nat", id] => self.rule_member::<NatRule>(request, id),
            ["ipsets"] => match request.method {
                Method::Get => Ok(ApiResponse::ok(serde_json::to_value(
                    self.store.address_sets()?,
                )?)),
                _ => Ok(method_not_allowed(request)),
            },
            ["ipsets", name] => self.address_set(request, name),
            ["export"] => match request.method {
                Method::Get => Ok(ApiResponse::ok(serde_json::to_value(
                    self.store.export()?,
                )?)),
                _ => Ok(method_not_allowed(request)),
            },
            ["import"] => match request.method {
                Method::Post => {
                    let document: ConfigDocument = request.json_body()?;
                    let imported = self.store.import(document)?;
                    Ok(ApiResponse::ok(serde_json::to_value(imported)?))
                }
                _ => Ok(method_not_allowed(request)),
            },
            ["connections"] => match request.method {
                Method::Get => Ok(ApiResponse::ok(serde_json::to_value(
                    self.conntrack.snapshot()?,
                )?)),
                _ => Ok(method_not_allowed(request)),
            },
            ["interfaces"] => match request.method {
                Method::Get => Ok(ApiResponse::ok(serde_json::to_value(host_interfaces(
                    Path::new(SYSFS_NET),
                ))?)),
                _ => Ok(method_not_allowed(request)),
            },
            _ => Err(Error::not_found("route", route)),
        }
    }

    fn rule_collection<R: StoredEntry>(&self, request: &ApiRequest) -> Result<ApiResponse> {
        match request.method {
            Method::Get => {
                let snapshot = self.store.load::<R>()?;
                Ok(ApiResponse::ok(serde_json::to_value(&snapshot.rules)?)
                    .with_version(snapshot.version))
            }
            Method::Post => {
                let rule: R = request.json_body()?;
                let before = request.query_id("before")?;
                let created = self
                    .store
                    .create(rule, before, request.expected_version()?)?;
                Ok(ApiResponse::created(serde_json::to_value(&created.rule)?)
                    .with_version(created.version))
            }
            _ => Ok(method_not_allowed(request)),
        }
    }

    fn rule_member<R: StoredEntry>(&self, request: &ApiRequest, id: &str) -> Result<ApiResponse> {
        let id: RuleId = id
            .parse()
            .map_err(|_| Error::validation("id", format!("'{id}' is not a rule id")))?;

        match request.method {
            Method::Get => {
                let found = self.store.get::<R>(id)?;
                Ok(ApiResponse::ok(serde_json::to_value(&found.rule)?).with_version(found.version))
            }
            Method::Put => {
                let rule: R = request.json_body()?;
                let before = request.query_id("before")?;
                let updated =
                    self.store
                        .replace(id, rule, before, request.expected_version()?)?;
                Ok(ApiResponse::ok(serde_json::to_value(&updated.rule)?)
                    .with_version(updated.version))
            }
            Method::Delete => {
                let version = self
                    .store
                    .delete::<R>(id, request.expected_version()?)?;
                Ok(ApiResponse::no_content().with_version(version))
            }
            Method::Post => Ok(method_not_allowed(request)),
        }
    }

    fn address_set(&self, request: &ApiRequest, name: &str) -> Result<ApiResponse> {
        match request.method {
            Method::Get => Ok(ApiResponse::ok(serde_json::to_value(
                self.store.address_set(name)?,
            )?)),
            Method::Put => {
                let members: Vec<String> = request.json_body()?;
                let set = self.store.put_address_set(name, members)?;
                Ok(ApiResponse::ok(serde_json::to_value(set)?))
            }
            Method::Delete => {
                self.store.delete_address_set(name)?;
                Ok(ApiResponse::no_content())
            }
            Method::Post => Ok(method_not_allowed(request)),
        }
    }
}

/// Names under `root` (a sysfs `class/net` directory) usable as NAT egress, sorted,
/// loopback excluded. An unreadable directory yields no names.
fn host_interfaces(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        tracing::debug!("Cannot list interfaces under {}", root.display());
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
        .filter(|name| name != "lo")
        .collect();
    names.sort();
    names
}

fn method_not_allowed(request: &ApiRequest) -> ApiResponse {
    ApiResponse::failure(
        405,
        ErrorKind::Validation,
        format!("{} is not allowed on {}", request.method, request.route()),
    )
}
