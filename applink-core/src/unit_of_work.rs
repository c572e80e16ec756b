//! Batching of record changes into a single composite graph request.
//!
//! A [`UnitOfWork`] collects creates, updates and deletes, each tagged with a
//! [`ReferenceId`]. Committing it through
//! [`DataApi::commit_unit_of_work`](crate::data_api::DataApi::commit_unit_of_work)
//! submits every change as one transactional graph and maps each reference id
//! to its result.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::data_api::{Error, RecordForCreate, RecordForUpdate, RecordModificationResult};

/// Error code the server assigns to subrequests skipped after a sibling failed.
const PROCESSING_HALTED: &str = "PROCESSING_HALTED";

/// Caller-facing handle for one registered change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(String);

impl ReferenceId {
    fn generate() -> Self {
        Self(format!("ref{}", Uuid::new_v4().simple()))
    }

    /// The raw reference id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Token that resolves to the id of the record this reference creates.
    ///
    /// Use it as a field value in a later registration of the same unit:
    ///
    /// ```
    /// use applink_core::data_api::RecordForCreate;
    /// use applink_core::unit_of_work::UnitOfWork;
    /// use serde_json::json;
    ///
    /// let mut unit = UnitOfWork::new();
    /// let account = unit.register_create(&RecordForCreate::new("Account").field("Name", json!("Acme")));
    /// unit.register_create(
    ///     &RecordForCreate::new("Contact")
    ///         .field("LastName", json!("Doe"))
    ///         .field("AccountId", json!(account.field_reference())),
    /// );
    /// assert_eq!(unit.len(), 2);
    /// ```
    pub fn field_reference(&self) -> String {
        format!("@{{{}.id}}", self.0)
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum Method {
    Post,
    Patch,
    Delete,
}

/// One registered change, held until commit.
#[derive(Debug, Clone)]
struct CompositeSubrequest {
    reference_id: ReferenceId,
    method: Method,
    // Resource path below `/services/data/v{version}`.
    resource: String,
    body: Option<Map<String, Value>>,
    record_id: Option<String>,
}

/// Ordered collection of pending record changes.
///
/// Registration is `&mut`; committing consumes the unit.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    graph_id: String,
    subrequests: Vec<CompositeSubrequest>,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    pub fn new() -> Self {
        Self {
            graph_id: format!("graph{}", Uuid::new_v4().simple()),
            subrequests: Vec::new(),
        }
    }

    /// Registers the creation of a record.
    pub fn register_create(&mut self, record: &RecordForCreate) -> ReferenceId {
        self.push(
            Method::Post,
            format!("/sobjects/{}", record.type_name),
            Some(record.fields.clone()),
            None,
        )
    }

    /// Registers an update of an existing record.
    ///
    /// The record id addresses the resource and is also sent as the `Id`
    /// field of the body.
    pub fn register_update(&mut self, record: &RecordForUpdate) -> ReferenceId {
        let mut body: Map<String, Value> = record
            .fields
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("id"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        body.insert("Id".to_string(), Value::String(record.id.clone()));

        self.push(
            Method::Patch,
            format!("/sobjects/{}/{}", record.type_name, record.id),
            Some(body),
            Some(record.id.clone()),
        )
    }

    /// Registers the deletion of a record.
    pub fn register_delete(&mut self, type_name: &str, id: &str) -> ReferenceId {
        self.push(
            Method::Delete,
            format!("/sobjects/{type_name}/{id}"),
            None,
            Some(id.to_string()),
        )
    }

    /// Number of registered changes.
    pub fn len(&self) -> usize {
        self.subrequests.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.subrequests.is_empty()
    }

    fn push(
        &mut self,
        method: Method,
        resource: String,
        body: Option<Map<String, Value>>,
        record_id: Option<String>,
    ) -> ReferenceId {
        let reference_id = ReferenceId::generate();
        self.subrequests.push(CompositeSubrequest {
            reference_id: reference_id.clone(),
            method,
            resource,
            body,
            record_id,
        });
        reference_id
    }

    /// Builds the composite graph payload for `api_version`.
    pub(crate) fn to_graph_request(&self, api_version: &str) -> GraphRequest<'_> {
        let composite_request = self
            .subrequests
            .iter()
            .map(|subrequest| GraphSubrequest {
                method: subrequest.method,
                url: format!("/services/data/v{api_version}{}", subrequest.resource),
                reference_id: subrequest.reference_id.as_str(),
                body: subrequest.body.as_ref(),
            })
            .collect();

        GraphRequest {
            graphs: vec![Graph {
                graph_id: &self.graph_id,
                composite_request,
            }],
        }
    }

    /// Maps a graph response back onto the registered reference ids.
    ///
    /// Fails as a whole if any subrequest failed.
    pub(crate) fn correlate(
        &self,
        response: GraphResponse,
    ) -> Result<HashMap<ReferenceId, RecordModificationResult>, Error> {
        let results: Vec<CompositeSubresponse> = response
            .graphs
            .into_iter()
            .flat_map(|graph| graph.graph_response.composite_response)
            .collect();

        if let Some(failure) = root_failure(&results) {
            let (code, message) = first_error(&failure.body);
            return Err(Error::CompositeSubrequest {
                reference_id: failure.reference_id.clone(),
                status: failure.http_status_code,
                code,
                message,
            });
        }

        let mut mapped = HashMap::with_capacity(results.len());
        for result in results {
            let subrequest = self
                .subrequests
                .iter()
                .find(|subrequest| subrequest.reference_id.as_str() == result.reference_id)
                .ok_or_else(|| Error::UnknownReference {
                    reference_id: result.reference_id.clone(),
                })?;

            let id = result
                .body
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| subrequest.record_id.clone())
                .ok_or_else(|| Error::MissingId {
                    reference_id: result.reference_id.clone(),
                })?;

            mapped.insert(
                subrequest.reference_id.clone(),
                RecordModificationResult { id },
            );
        }

        Ok(mapped)
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// First failed subresponse, preferring the one that halted its siblings.
fn root_failure(results: &[CompositeSubresponse]) -> Option<&CompositeSubresponse> {
    let mut failures = results.iter().filter(|r| !is_success(r.http_status_code));
    let first = failures.next()?;
    if first_error(&first.body).0.as_deref() != Some(PROCESSING_HALTED) {
        return Some(first);
    }
    failures
        .find(|r| first_error(&r.body).0.as_deref() != Some(PROCESSING_HALTED))
        .or(Some(first))
}

/// Error code and message from a subresponse body (`[{errorCode, message}]`).
fn first_error(body: &Value) -> (Option<String>, String) {
    let entry = body.as_array().and_then(|errors| errors.first()).unwrap_or(body);
    let code = entry
        .get("errorCode")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = entry
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    (code, message)
}

#[derive(Debug, Serialize)]
pub(crate) struct GraphRequest<'a> {
    graphs: Vec<Graph<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Graph<'a> {
    graph_id: &'a str,
    composite_request: Vec<GraphSubrequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubrequest<'a> {
    method: Method,
    url: String,
    reference_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphResponse {
    graphs: Vec<GraphResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphResult {
    graph_response: GraphResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphResponseBody {
    composite_response: Vec<CompositeSubresponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeSubresponse {
    #[serde(default)]
    body: Value,
    http_status_code: u16,
    reference_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_response(results: Value) -> GraphResponse {
        serde_json::from_value(json!({
            "graphs": [{
                "graphId": "graph1",
                "isSuccessful": true,
                "graphResponse": {"compositeResponse": results}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_reference_ids_are_unique() {
        let mut unit = UnitOfWork::new();
        let a = unit.register_delete("Account", "001A");
        let b = unit.register_delete("Account", "001B");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("ref"));
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(a.field_reference(), format!("@{{{a}.id}}"));
    }

    #[test]
    fn test_graph_request_substitutes_api_version_at_build_time() {
        let mut unit = UnitOfWork::new();
        let create =
            unit.register_create(&RecordForCreate::new("Account").field("Name", json!("Acme")));
        let delete = unit.register_delete("Contact", "003xx");

        let v65 = serde_json::to_value(unit.to_graph_request("65.0")).unwrap();
        let v62 = serde_json::to_value(unit.to_graph_request("62.0")).unwrap();

        let requests = &v65["graphs"][0]["compositeRequest"];
        assert_eq!(requests[0]["method"], "POST");
        assert_eq!(requests[0]["url"], "/services/data/v65.0/sobjects/Account");
        assert_eq!(requests[0]["referenceId"], create.as_str());
        assert_eq!(requests[0]["body"], json!({"Name": "Acme"}));
        assert_eq!(requests[1]["method"], "DELETE");
        assert_eq!(requests[1]["url"], "/services/data/v65.0/sobjects/Contact/003xx");
        assert_eq!(requests[1]["referenceId"], delete.as_str());
        assert!(requests[1].get("body").is_none());
        assert_eq!(
            v62["graphs"][0]["compositeRequest"][1]["url"],
            "/services/data/v62.0/sobjects/Contact/003xx"
        );
    }

    #[test]
    fn test_body_is_snapshot_at_registration() {
        let mut record = RecordForCreate::new("Account").field("Name", json!("Before"));
        let mut unit = UnitOfWork::new();
        unit.register_create(&record);
        record.fields.insert("Name".to_string(), json!("After"));

        let request = serde_json::to_value(unit.to_graph_request("65.0")).unwrap();
        assert_eq!(
            request["graphs"][0]["compositeRequest"][0]["body"]["Name"],
            "Before"
        );
    }

    #[test]
    fn test_register_update_injects_id() {
        let mut unit = UnitOfWork::new();
        unit.register_update(
            &RecordForUpdate::new("Account", "001xx")
                .field("id", json!("stale"))
                .field("Name", json!("Renamed")),
        );

        let request = serde_json::to_value(unit.to_graph_request("65.0")).unwrap();
        let subrequest = &request["graphs"][0]["compositeRequest"][0];
        assert_eq!(subrequest["method"], "PATCH");
        assert_eq!(subrequest["url"], "/services/data/v65.0/sobjects/Account/001xx");
        assert_eq!(subrequest["body"], json!({"Id": "001xx", "Name": "Renamed"}));
    }

    #[test]
    fn test_correlate_success() {
        let mut unit = UnitOfWork::new();
        let create = unit.register_create(&RecordForCreate::new("Account"));
        let update = unit.register_update(&RecordForUpdate::new("Account", "001B"));
        let delete = unit.register_delete("Account", "001C");

        let results = unit
            .correlate(graph_response(json!([
                {"body": {"id": "001A", "success": true, "errors": []},
                 "httpStatusCode": 201, "referenceId": create.as_str()},
                {"body": null, "httpStatusCode": 204, "referenceId": update.as_str()},
                {"httpStatusCode": 204, "referenceId": delete.as_str()}
            ])))
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[&create].id, "001A");
        assert_eq!(results[&update].id, "001B");
        assert_eq!(results[&delete].id, "001C");
    }

    #[test]
    fn test_correlate_fails_on_any_error_status() {
        let mut unit = UnitOfWork::new();
        let ok = unit.register_create(&RecordForCreate::new("Account"));
        let bad = unit.register_create(&RecordForCreate::new("Account"));

        let result = unit.correlate(graph_response(json!([
            {"body": {"id": "001A"}, "httpStatusCode": 201, "referenceId": ok.as_str()},
            {"body": [{"errorCode": "REQUIRED_FIELD_MISSING", "message": "Required fields are missing: [Name]"}],
             "httpStatusCode": 400, "referenceId": bad.as_str()}
        ])));

        match result {
            Err(Error::CompositeSubrequest {
                reference_id,
                status,
                code,
                message,
            }) => {
                assert_eq!(reference_id, bad.as_str());
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("REQUIRED_FIELD_MISSING"));
                assert_eq!(message, "Required fields are missing: [Name]");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_correlate_reports_root_cause_over_halted_siblings() {
        let mut unit = UnitOfWork::new();
        let first = unit.register_create(&RecordForCreate::new("Account"));
        let second = unit.register_create(&RecordForCreate::new("Contact"));

        let halted = json!([{"errorCode": "PROCESSING_HALTED",
            "message": "The transaction was rolled back since another operation in the same transaction failed."}]);
        let result = unit.correlate(graph_response(json!([
            {"body": halted, "httpStatusCode": 400, "referenceId": first.as_str()},
            {"body": [{"errorCode": "INVALID_FIELD", "message": "No such column 'Foo'"}],
             "httpStatusCode": 400, "referenceId": second.as_str()}
        ])));

        assert!(matches!(
            result,
            Err(Error::CompositeSubrequest { reference_id, .. }) if reference_id == second.as_str()
        ));
    }

    #[test]
    fn test_correlate_rejects_unknown_reference() {
        let mut unit = UnitOfWork::new();
        unit.register_create(&RecordForCreate::new("Account"));

        let result = unit.correlate(graph_response(json!([
            {"body": {"id": "001A"}, "httpStatusCode": 201, "referenceId": "refUnknown"}
        ])));
        assert!(matches!(
            result,
            Err(Error::UnknownReference { reference_id }) if reference_id == "refUnknown"
        ));
    }

    #[test]
    fn test_correlate_requires_id_for_creates() {
        let mut unit = UnitOfWork::new();
        let create = unit.register_create(&RecordForCreate::new("Account"));

        let result = unit.correlate(graph_response(json!([
            {"body": {"success": true}, "httpStatusCode": 201, "referenceId": create.as_str()}
        ])));
        assert!(matches!(result, Err(Error::MissingId { .. })));
    }
}
