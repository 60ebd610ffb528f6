//! Client side of the rule store API
//!
//! [`RuleClient`] speaks the request/response contract of [`crate::api`] over any
//! [`Transport`], turning error bodies back into [`Error::Remote`] values.
//!
//! [`RuleListView`] is the locally displayed copy of one list. The store is the only
//! source of truth: after every mutation the view reloads, and a mutation result
//! that arrives after a newer load has landed is reported as stale so the caller
//! can drop it instead of overwriting fresher state.

use crate::api::{ApiRequest, ApiResponse, ErrorBody, Method, API_PREFIX};
use crate::conntrack::ConnectionSnapshot;
use crate::core::address_set::AddressSet;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::export::ConfigDocument;
use crate::core::ordered_list::ListSnapshot;
use crate::core::rule::{Entry, RuleId};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Carries one request to a rule store and returns its response.
pub trait Transport {
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the store could not be reached at all. Error
    /// *responses* are returned as `Ok`.
    fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

impl Transport for crate::api::Api {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        Ok(self.handle(&request))
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        (**self).send(request)
    }
}

pub struct RuleClient<T> {
    transport: T,
}

impl<T: Transport> RuleClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Sends a raw request and returns the response whatever its status.
    ///
    /// # Errors
    ///
    /// Fails only if the transport fails.
    pub fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.transport.send(request)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn load<R: Entry>(&self) -> Result<ListSnapshot<R>> {
        let response = self.call(ApiRequest::new(Method::Get, &collection_path::<R>()))?;
        let version = response.version.unwrap_or_default();
        Ok(ListSnapshot {
            version,
            rules: decode(response)?,
        })
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn create<R: Entry>(
        &self,
        rule: &R,
        before: Option<RuleId>,
        expected_version: Option<u64>,
    ) -> Result<R> {
        let request = ApiRequest::new(Method::Post, &collection_path::<R>())
            .with_body(serde_json::to_value(rule)?);
        decode(self.call(with_mutation_query(request, before, expected_version))?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn replace<R: Entry>(
        &self,
        id: RuleId,
        rule: &R,
        before: Option<RuleId>,
        expected_version: Option<u64>,
    ) -> Result<R> {
        let request = ApiRequest::new(Method::Put, &member_path::<R>(id))
            .with_body(serde_json::to_value(rule)?);
        decode(self.call(with_mutation_query(request, before, expected_version))?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn delete<R: Entry>(&self, id: RuleId, expected_version: Option<u64>) -> Result<()> {
        let request = ApiRequest::new(Method::Delete, &member_path::<R>(id));
        self.call(with_mutation_query(request, None, expected_version))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn address_sets(&self) -> Result<Vec<AddressSet>> {
        decode(self.call(ApiRequest::new(Method::Get, &format!("{API_PREFIX}/ipsets")))?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn put_address_set(&self, name: &str, members: &[String]) -> Result<AddressSet> {
        let request = ApiRequest::new(Method::Put, &format!("{API_PREFIX}/ipsets/{name}"))
            .with_body(serde_json::to_value(members)?);
        decode(self.call(request)?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn delete_address_set(&self, name: &str) -> Result<()> {
        self.call(ApiRequest::new(
            Method::Delete,
            &format!("{API_PREFIX}/ipsets/{name}"),
        ))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn export(&self) -> Result<ConfigDocument> {
        decode(self.call(ApiRequest::new(Method::Get, &format!("{API_PREFIX}/export")))?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn import(&self, document: &ConfigDocument) -> Result<ConfigDocument> {
        let request = ApiRequest::new(Method::Post, &format!("{API_PREFIX}/import"))
            .with_body(serde_json::to_value(document)?);
        decode(self.call(request)?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn connections(&self) -> Result<ConnectionSnapshot> {
        decode(self.call(ApiRequest::new(
            Method::Get,
            &format!("{API_PREFIX}/connections"),
        ))?)
    }

    /// # Errors
    ///
    /// Transport failures and error responses.
    pub fn interfaces(&self) -> Result<Vec<String>> {
        decode(self.call(ApiRequest::new(
            Method::Get,
            &format!("{API_PREFIX}/interfaces"),
        ))?)
    }

    fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.transport.send(request)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(remote_error(&response))
        }
    }
}

fn collection_path<R: Entry>() -> String {
    format!("{API_PREFIX}/{}", R::KIND.resource())
}

fn member_path<R: Entry>(id: RuleId) -> String {
    format!("{API_PREFIX}/{}/{id}", R::KIND.resource())
}

fn with_mutation_query(
    mut request: ApiRequest,
    before: Option<RuleId>,
    expected_version: Option<u64>,
) -> ApiRequest {
    if let Some(before) = before {
        request = request.with_query("before", before);
    }
    if let Some(version) = expected_version {
        request = request.with_query("version", version);
    }
    request
}

fn decode<V: DeserializeOwned>(response: ApiResponse) -> Result<V> {
    let body = response
        .body
        .ok_or_else(|| Error::Transport("response has no body".to_string()))?;
    serde_json::from_value(body).map_err(|e| Error::Transport(format!("malformed response: {e}")))
}

/// Maps an error response to [`Error::Remote`]. Bodies that are not an
/// [`ErrorBody`] yield [`ErrorKind::Unknown`].
pub fn remote_error(response: &ApiResponse) -> Error {
    let parsed = response
        .body
        .clone()
        .and_then(|body| serde_json::from_value::<ErrorBody>(body).ok());

    match parsed {
        Some(body) => Error::Remote {
            kind: body.kind,
            status: response.status,
            message: body.message,
        },
        None => Error::Remote {
            kind: ErrorKind::Unknown,
            status: response.status,
            message: format!("request failed with status {}", response.status),
        },
    }
}

/// Proof that a mutation was submitted while the view showed a given version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationTicket {
    version: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The view has not moved on; apply the result
    Current,
    /// A load for a different version finished in the meantime; drop the result
    Stale,
}

/// Local copy of one rule list
#[derive(Debug, Clone)]
pub struct RuleListView<R> {
    rules: Vec<R>,
    version: Option<u64>,
}

impl<R: Entry> Default for RuleListView<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Entry> RuleListView<R> {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            version: None,
        }
    }

    pub fn rules(&self) -> &[R] {
        &self.rules
    }

    /// `None` until the first load.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Replaces the whole local sequence with a fetched snapshot.
    pub fn apply_load(&mut self, snapshot: ListSnapshot<R>) {
        self.rules = snapshot.rules;
        self.version = Some(snapshot.version);
    }

    /// Fetches and applies the current list.
    ///
    /// # Errors
    ///
    /// Transport failures and error responses; the view is left unchanged.
    pub fn reload<T: Transport>(&mut self, client: &RuleClient<T>) -> Result<()> {
        let snapshot = client.load::<R>()?;
        self.apply_load(snapshot);
        Ok(())
    }

    /// Call when submitting a mutation; pass the ticket to [`Self::accept_result`]
    /// when its result arrives.
    pub fn begin_mutation(&self) -> MutationTicket {
        MutationTicket {
            version: self.version,
        }
    }

    pub fn accept_result(&self, ticket: MutationTicket) -> MutationOutcome {
        if ticket.version == self.version {
            MutationOutcome::Current
        } else {
            MutationOutcome::Stale
        }
    }

    /// Position of rule `id` in the local copy.
    pub fn position(&self, id: RuleId) -> Option<usize> {
        self.rules.iter().position(|rule| rule.id() == Some(id))
    }

    /// Id of the rule currently following `id`, i.e. the anchor that keeps `id` in
    /// place when replaying a move. `None` for the last rule.
    pub fn anchor_after(&self, id: RuleId) -> Option<RuleId> {
        let position = self.position(id)?;
        self.rules.get(position + 1).and_then(|rule| rule.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Api;
    use crate::core::policy::{Action, Policy};
    use crate::core::test_helpers::{policy, seeded_store};
    use serde_json::json;

    fn client() -> RuleClient<Api> {
        RuleClient::new(Api::new(Arc::new(seeded_store())))
    }

    /// Transport that fails before reaching any store
    struct Unreachable;

    impl Transport for Unreachable {
        fn send(&self, _request: ApiRequest) -> Result<ApiResponse> {
            Err(Error::Transport("connection refused".into()))
        }
    }

    /// Transport answering every request with a fixed response
    struct Canned(ApiResponse);

    impl Transport for Canned {
        fn send(&self, _request: ApiRequest) -> Result<ApiResponse> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_load_and_create_through_client() {
        let client = client();
        let created = client
            .create(&policy(Action::Drop), Some(RuleId(2)), None)
            .unwrap();
        assert_eq!(created.id, Some(RuleId(3)));

        let snapshot = client.load::<Policy>().unwrap();
        assert_eq!(snapshot.version, 3);
        let ids: Vec<_> = snapshot.rules.iter().map(|p| p.id.unwrap().0).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_error_response_becomes_remote_error() {
        let client = client();
        let err = client.delete::<Policy>(RuleId(99), None).unwrap_err();
        assert!(matches!(
            err,
            Error::Remote {
                kind: ErrorKind::NotFound,
                status: 404,
                ..
            }
        ));
        assert!(err.kind().requires_reload());
    }

    #[test]
    fn test_unparsable_error_body_is_unknown() {
        let client = RuleClient::new(Canned(ApiResponse {
            status: 500,
            body: Some(json!("<html>oops</html>")),
            version: None,
        }));
        let err = client.load::<Policy>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_transport_failure_passes_through() {
        let client = RuleClient::new(Unreachable);
        let err = client.load::<Policy>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_view_discards_result_after_newer_load() {
        let client = client();
        let mut view = RuleListView::<Policy>::new();
        view.reload(&client).unwrap();

        let ticket = view.begin_mutation();
        // Another editor's change lands and this view reloads before our result is handled
        client.delete::<Policy>(RuleId(1), None).unwrap();
        view.reload(&client).unwrap();

        assert_eq!(view.accept_result(ticket), MutationOutcome::Stale);
    }

    #[test]
    fn test_view_keeps_result_without_intervening_load() {
        let client = client();
        let mut view = RuleListView::<Policy>::new();
        view.reload(&client).unwrap();

        let ticket = view.begin_mutation();
        client.create(&policy(Action::Drop), None, None).unwrap();
        assert_eq!(view.accept_result(ticket), MutationOutcome::Current);

        view.reload(&client).unwrap();
        assert_eq!(view.rules().len(), 3);
        assert_eq!(view.anchor_after(RuleId(1)), Some(RuleId(2)));
        assert_eq!(view.anchor_after(RuleId(3)), None);
    }

    #[test]
    fn test_address_sets_and_export_through_client() {
        let client = client();
        client
            .put_address_set("lan", &["10.0.0.0/8".to_string()])
            .unwrap();
        assert_eq!(client.address_sets().unwrap().len(), 1);

        let document = client.export().unwrap();
        assert_eq!(document.address_sets[0].name, "lan");
        let imported = client.import(&document).unwrap();
        assert!(imported.same_content(&document));

        client.delete_address_set("lan").unwrap();
        assert!(client.address_sets().unwrap().is_empty());
    }
}
