//! Mediator envelope: the structured response format a backend may return in
//! place of a raw body, reporting a logical response plus the sub-calls it
//! made while servicing the request.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Reserved content-type marker identifying a mediator envelope.
///
/// This is a bit-exact wire contract: backends are configured to emit
/// exactly this media type, and misdetection silently changes dispatch
/// behavior.
pub const MEDIATOR_CONTENT_TYPE: &str = "application/json+openhim";

/// Whether a `Content-Type` header value carries the mediator marker.
/// Parameters (`; charset=...`) are ignored.
pub fn is_mediator_content_type(header: &str) -> bool {
    header
        .split(';')
        .next()
        .map(|media_type| media_type.trim().eq_ignore_ascii_case(MEDIATOR_CONTENT_TYPE))
        .unwrap_or(false)
}

/// A logical request or response snapshot inside an orchestration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(with = "time::serde::rfc3339::option", default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<OffsetDateTime>,
}

/// One sub-call the backend made while servicing the primary request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orchestration {
    pub name: String,

    #[serde(default)]
    pub request: OrchestrationMessage,

    #[serde(default)]
    pub response: OrchestrationMessage,
}

/// A named measurement reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediatorMetric {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub name: String,
    pub value: f64,
}

/// Error reported inside an envelope. Marks the route as failed for retry
/// purposes even though the transport succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediatorError {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// The full envelope structure. The nested `status`/`headers`/`body`/
/// `timestamp` replace the raw transport response for the route that
/// returned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediatorResponse {
    pub status: u16,

    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(default)]
    pub body: String,

    #[serde(with = "time::serde::rfc3339::option", default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<OffsetDateTime>,

    #[serde(default)]
    pub orchestrations: Vec<Orchestration>,

    #[serde(default)]
    pub properties: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub metrics: Vec<MediatorMetric>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MediatorError>,
}
