//! Request-scoped dispatch records: built during one request's fan-out,
//! handed as an immutable value to the transaction-recording collaborator,
//! then discarded.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::mediator::{MediatorMetric, Orchestration};

/// Snapshot of one outbound request as it was sent to a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Snapshot of one route's response, possibly already envelope-unwrapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    pub status: u16,

    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(default)]
    pub body: String,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ResponseSnapshot {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: IndexMap::new(),
            body: body.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of one dispatched route, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    pub name: String,
    pub primary: bool,
    pub request: RequestSnapshot,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set when the response snapshot was synthesized because the route
    /// failed before producing one. Defaulting is logged loudly when it
    /// triggers.
    #[serde(default)]
    pub defaulted: bool,
}

/// A structured cookie re-issued on the client response in place of a
/// verbatim `Set-Cookie` header copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCookie {
    pub name: String,
    pub value: String,

    /// Max-Age in integer seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,

    #[serde(with = "time::serde::rfc3339::option", default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<OffsetDateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub http_only: bool,
}

/// The client-facing response after reconciliation: primary response with
/// the per-header copy-down rules applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    pub status: u16,

    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(default)]
    pub cookies: Vec<SetCookie>,

    /// Redirect target, set only when the primary response was a 3xx with a
    /// `Location` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,

    #[serde(default)]
    pub body: String,
}

/// Everything one dispatch produced. Final only after every route has
/// settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    /// The shaped client-facing response.
    pub response: ClientResponse,

    /// The primary route's (possibly envelope-unwrapped) response as
    /// recorded for audit.
    pub primary: ResponseSnapshot,

    /// Non-primary route outcomes, retained purely for downstream
    /// recording; they never affect the client-visible response.
    #[serde(default)]
    pub routes: Vec<RouteOutcome>,

    /// Sub-calls reported by the primary route's mediator envelope.
    #[serde(default)]
    pub orchestrations: Vec<Orchestration>,

    #[serde(default)]
    pub properties: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub metrics: Vec<MediatorMetric>,

    /// Set whenever any route failed in a way the external retry policy
    /// should act on.
    #[serde(default)]
    pub auto_retry: bool,

    /// Internal failure detail for downstream logging/audit; never echoed
    /// to the client beyond the generic error body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
