//! Route dispatch: fan one matched request out to every enabled route of a
//! channel concurrently, then reconcile the settled outcomes into a single
//! client-facing response.
//!
//! All route futures are driven through one `join_all`, so the dispatch
//! future is the single cancellation point: dropping it (client abort)
//! tears down every in-flight outbound operation.

mod http;
mod socket;

use bytes::Bytes;
use futures_util::future::join_all;
use hiegate_core::{
    Channel, ClientResponse, CoreError, DispatchResult, Keystore, MediatorResponse,
    RequestSnapshot, ResponseSnapshot, Result, Route, RouteOutcome, SetCookie,
    is_mediator_content_type,
};
use indexmap::IndexMap;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Generic body returned to the client when the primary route fails; the
/// real failure detail stays in the dispatch result for downstream audit.
pub const INTERNAL_ERROR_BODY: &str = "An internal server error occurred";

/// Multi-value response headers are newline-joined inside a snapshot; the
/// cookie copy-down splits them back apart.
pub const HEADER_VALUE_SEPARATOR: char = '\n';

/// The inbound request as the dispatcher sees it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: IndexMap<String, String>,
    pub body: Bytes,
}

impl InboundRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Dispatcher-wide settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Fallback timeout when neither route nor channel override one.
    pub default_timeout_ms: u64,
    /// Transaction-correlation header re-stamped onto the client response.
    pub correlation_header: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            correlation_header: "x-correlation-id".to_string(),
        }
    }
}

/// Executes a channel's routes and reconciles the results.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
    config: DispatchConfig,
}

/// One route's settled state before reconciliation.
struct SettledRoute {
    name: String,
    primary: bool,
    request: RequestSnapshot,
    outcome: Result<(ResponseSnapshot, Option<MediatorResponse>)>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        // Redirects belong to the client: a backend 3xx must reach
        // reconciliation intact, never be followed on its behalf.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");
        Self { http, config }
    }

    /// Dispatch one request across every enabled route of the channel.
    ///
    /// Fails fast with a configuration error, before any network I/O, when
    /// the channel does not have exactly one enabled primary route. The
    /// result is final only once every route has settled.
    #[instrument(skip(self, channel, inbound, keystore), fields(channel = %channel.name))]
    pub async fn dispatch(
        &self,
        channel: &Channel,
        inbound: &InboundRequest,
        keystore: &Keystore,
    ) -> Result<DispatchResult> {
        channel.primary_route()?;

        let futures: Vec<_> = channel
            .enabled_routes()
            .map(|route| self.execute_route(channel, route, inbound, keystore))
            .collect();

        debug!(routes = futures.len(), "dispatching routes");
        let settled = join_all(futures).await;

        self.reconcile(inbound, settled)
    }

    /// Run one route to completion, unwrapping a mediator envelope when the
    /// backend returned one. A malformed envelope is a protocol error,
    /// treated as a failure of this route only.
    async fn execute_route(
        &self,
        channel: &Channel,
        route: &Route,
        inbound: &InboundRequest,
        keystore: &Keystore,
    ) -> SettledRoute {
        let timeout_ms = route
            .timeout_ms
            .or(channel.timeout_ms)
            .unwrap_or(self.config.default_timeout_ms);

        let (request, result) = if route.protocol.is_http() {
            http::execute(&self.http, route, inbound, timeout_ms).await
        } else {
            socket::execute(route, inbound, keystore, timeout_ms).await
        };

        let outcome = result.and_then(|snapshot| unwrap_envelope(snapshot, &route.name));

        SettledRoute {
            name: route.name.clone(),
            primary: route.primary,
            request,
            outcome,
        }
    }

    fn reconcile(
        &self,
        inbound: &InboundRequest,
        settled: Vec<SettledRoute>,
    ) -> Result<DispatchResult> {
        let mut auto_retry = false;
        let mut non_primary = Vec::new();
        let mut primary_settled = None;

        for route in settled {
            if route.primary {
                primary_settled = Some(route);
            } else {
                non_primary.push(settle_non_primary(route, &mut auto_retry));
            }
        }

        // Guaranteed by the primary_route() validation up front.
        let primary = primary_settled.ok_or_else(|| {
            CoreError::configuration("dispatch settled without a primary route")
        })?;

        // Re-stamp the inbound correlation id, minting one for requests
        // arriving without it.
        let correlation = inbound
            .header(&self.config.correlation_header)
            .map(|v| v.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = match primary.outcome {
            Ok((snapshot, envelope)) => {
                let mut orchestrations = Vec::new();
                let mut properties = IndexMap::new();
                let mut metrics = Vec::new();
                let mut error = None;

                if let Some(envelope) = envelope {
                    // Orchestration capture happens only for the primary
                    // route; an envelope error fails the route even though
                    // the transport succeeded.
                    orchestrations = envelope.orchestrations;
                    properties = envelope.properties;
                    metrics = envelope.metrics;
                    if let Some(env_error) = envelope.error {
                        warn!(route = %primary.name, error = %env_error.message, "mediator reported an error");
                        error = Some(env_error.message);
                    }
                }

                if let Some(message) = error {
                    auto_retry = true;
                    DispatchResult {
                        response: internal_error_response(&self.config.correlation_header, &correlation),
                        primary: snapshot,
                        routes: non_primary,
                        orchestrations,
                        properties,
                        metrics,
                        auto_retry,
                        error: Some(message),
                    }
                } else {
                    info!(route = %primary.name, status = snapshot.status, "primary route settled");
                    let response = shape_client_response(
                        &snapshot,
                        &self.config.correlation_header,
                        Some(correlation),
                    );
                    DispatchResult {
                        response,
                        primary: snapshot,
                        routes: non_primary,
                        orchestrations,
                        properties,
                        metrics,
                        auto_retry,
                        error: None,
                    }
                }
            }
            Err(e) => {
                warn!(route = %primary.name, error = %e, "primary route failed");
                let detail = e.to_string();
                DispatchResult {
                    response: internal_error_response(&self.config.correlation_header, &correlation),
                    primary: ResponseSnapshot::new(500, INTERNAL_ERROR_BODY),
                    routes: non_primary,
                    orchestrations: Vec::new(),
                    properties: IndexMap::new(),
                    metrics: Vec::new(),
                    auto_retry: true,
                    error: Some(detail),
                }
            }
        };

        Ok(result)
    }
}

/// Non-primary outcomes never touch the client response; failures are
/// annotated on the outcome and, when no response exists, masked with a
/// defaulted 500/now snapshot. The masking is deliberate but loud.
fn settle_non_primary(route: SettledRoute, auto_retry: &mut bool) -> RouteOutcome {
    match route.outcome {
        Ok((snapshot, envelope)) => {
            let error = envelope.and_then(|env| env.error).map(|env_error| {
                *auto_retry = true;
                env_error.message
            });
            RouteOutcome {
                name: route.name,
                primary: false,
                request: route.request,
                response: Some(snapshot),
                error,
                defaulted: false,
            }
        }
        Err(e) => {
            if e.is_retryable() {
                *auto_retry = true;
            }
            warn!(
                route = %route.name,
                error = %e,
                "non-primary route failed without a response, recording defaulted 500 snapshot"
            );
            RouteOutcome {
                name: route.name,
                primary: false,
                request: route.request,
                response: Some(ResponseSnapshot::new(500, "")),
                error: Some(e.to_string()),
                defaulted: true,
            }
        }
    }
}

/// If the response carries the reserved mediator content type, parse the
/// body as an envelope and let its nested response replace the raw one.
fn unwrap_envelope(
    snapshot: ResponseSnapshot,
    route_name: &str,
) -> Result<(ResponseSnapshot, Option<MediatorResponse>)> {
    let is_envelope = snapshot
        .header("content-type")
        .map(is_mediator_content_type)
        .unwrap_or(false);
    if !is_envelope {
        return Ok((snapshot, None));
    }

    let envelope: MediatorResponse = serde_json::from_str(&snapshot.body).map_err(|e| {
        CoreError::protocol(format!(
            "malformed mediator envelope from route '{route_name}': {e}"
        ))
    })?;

    let unwrapped = ResponseSnapshot {
        status: envelope.status,
        headers: envelope.headers.clone(),
        body: envelope.body.clone(),
        timestamp: envelope.timestamp.unwrap_or(snapshot.timestamp),
    };
    Ok((unwrapped, Some(envelope)))
}

fn internal_error_response(correlation_header: &str, correlation: &str) -> ClientResponse {
    let mut headers = IndexMap::new();
    headers.insert(correlation_header.to_string(), correlation.to_string());
    ClientResponse {
        status: 500,
        headers,
        cookies: Vec::new(),
        redirect: None,
        body: INTERNAL_ERROR_BODY.to_string(),
    }
}

/// Copy the primary response down to the client response under the fixed
/// per-header rules: cookies are parsed and re-issued structurally,
/// `location` only redirects on 3xx, and the hop-managed length/encoding
/// headers are never copied.
fn shape_client_response(
    primary: &ResponseSnapshot,
    correlation_header: &str,
    correlation: Option<String>,
) -> ClientResponse {
    let mut headers = IndexMap::new();
    let mut cookies = Vec::new();
    let mut redirect = None;

    // The correlation header is re-stamped before the copy-down rules run,
    // so a backend echoing its own value gets overridden below only if it
    // emits the header itself.
    if let Some(value) = correlation {
        headers.insert(correlation_header.to_string(), value);
    }

    for (name, value) in &primary.headers {
        match name.to_ascii_lowercase().as_str() {
            "set-cookie" => {
                for raw in value.split(HEADER_VALUE_SEPARATOR) {
                    match parse_set_cookie(raw) {
                        Ok(cookie) => cookies.push(cookie),
                        Err(e) => warn!(error = %e, "unparseable set-cookie header dropped"),
                    }
                }
            }
            "location" => {
                if (300..400).contains(&primary.status) {
                    redirect = Some(value.clone());
                }
                headers.insert(name.clone(), value.clone());
            }
            // The gateway manages message framing itself.
            "content-length" | "content-encoding" | "transfer-encoding" => {}
            _ => {
                headers.insert(name.clone(), value.clone());
            }
        }
    }

    ClientResponse {
        status: primary.status,
        headers,
        cookies,
        redirect,
        body: primary.body.clone(),
    }
}

/// Parse one `Set-Cookie` value into the structured cookie re-issued on the
/// client response.
fn parse_set_cookie(raw: &str) -> Result<SetCookie> {
    let parsed = cookie::Cookie::parse(raw.trim())
        .map_err(|e| CoreError::protocol(format!("invalid set-cookie: {e}")))?;

    let expires = match parsed.expires() {
        Some(cookie::Expiration::DateTime(dt)) => Some(dt),
        _ => None,
    };

    Ok(SetCookie {
        name: parsed.name().to_string(),
        value: parsed.value().to_string(),
        max_age: parsed.max_age().map(|d| d.whole_seconds()),
        expires,
        path: parsed.path().map(|p| p.to_string()),
        domain: parsed.domain().map(|d| d.to_string()),
        secure: parsed.secure().unwrap_or(false),
        http_only: parsed.http_only().unwrap_or(false),
    })
}

/// Render a structured cookie back into a `Set-Cookie` header value.
pub fn render_set_cookie(cookie: &SetCookie) -> String {
    let mut built = cookie::Cookie::build((cookie.name.clone(), cookie.value.clone()));
    if let Some(max_age) = cookie.max_age {
        built = built.max_age(time::Duration::seconds(max_age));
    }
    if let Some(expires) = cookie.expires {
        built = built.expires(expires);
    }
    if let Some(path) = &cookie.path {
        built = built.path(path.clone());
    }
    if let Some(domain) = &cookie.domain {
        built = built.domain(domain.clone());
    }
    if cookie.secure {
        built = built.secure(true);
    }
    if cookie.http_only {
        built = built.http_only(true);
    }
    built.build().to_string()
}

/// Timestamp helper shared by the transport handlers.
pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: u16, headers: &[(&str, &str)]) -> ResponseSnapshot {
        let mut snap = ResponseSnapshot::new(status, "body");
        for (k, v) in headers {
            snap.headers.insert(k.to_string(), v.to_string());
        }
        snap
    }

    #[test]
    fn set_cookie_is_restructured_not_copied() {
        let snap = snapshot(200, &[("Set-Cookie", "sid=abc; Max-Age=60; HttpOnly")]);
        let response = shape_client_response(&snap, "x-correlation-id", None);

        assert!(response.headers.is_empty());
        assert_eq!(response.cookies.len(), 1);
        let cookie = &response.cookies[0];
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.max_age, Some(60));
        assert!(cookie.http_only);
        assert!(!cookie.secure);
    }

    #[test]
    fn multiple_set_cookie_values_split() {
        let snap = snapshot(200, &[("set-cookie", "a=1; Path=/\nb=2; Secure")]);
        let response = shape_client_response(&snap, "x-correlation-id", None);
        assert_eq!(response.cookies.len(), 2);
        assert_eq!(response.cookies[0].path.as_deref(), Some("/"));
        assert!(response.cookies[1].secure);
    }

    #[test]
    fn location_redirects_only_on_3xx() {
        let snap = snapshot(302, &[("Location", "/elsewhere")]);
        let response = shape_client_response(&snap, "x-correlation-id", None);
        assert_eq!(response.redirect.as_deref(), Some("/elsewhere"));

        let snap = snapshot(201, &[("Location", "/created/1")]);
        let response = shape_client_response(&snap, "x-correlation-id", None);
        assert!(response.redirect.is_none());
        assert_eq!(
            response.headers.get("Location").map(String::as_str),
            Some("/created/1")
        );
    }

    #[test]
    fn framing_headers_never_copied() {
        let snap = snapshot(
            200,
            &[
                ("Content-Length", "42"),
                ("Content-Encoding", "gzip"),
                ("Transfer-Encoding", "chunked"),
                ("X-Custom", "kept"),
            ],
        );
        let response = shape_client_response(&snap, "x-correlation-id", None);
        assert_eq!(response.headers.len(), 1);
        assert_eq!(
            response.headers.get("X-Custom").map(String::as_str),
            Some("kept")
        );
    }

    #[test]
    fn correlation_header_is_restamped() {
        let snap = snapshot(200, &[("x-upstream", "yes")]);
        let response = shape_client_response(
            &snap,
            "x-correlation-id",
            Some("txn-123".to_string()),
        );
        assert_eq!(
            response.headers.get("x-correlation-id").map(String::as_str),
            Some("txn-123")
        );
    }

    #[test]
    fn envelope_unwrap_replaces_raw_response() {
        let mut snap = ResponseSnapshot::new(200, "");
        snap.headers.insert(
            "content-type".to_string(),
            "application/json+openhim".to_string(),
        );
        snap.body = r#"{"status": 404, "headers": {"content-type": "text/plain"}, "body": "missing"}"#
            .to_string();

        let (unwrapped, envelope) = unwrap_envelope(snap, "r1").unwrap();
        assert_eq!(unwrapped.status, 404);
        assert_eq!(unwrapped.body, "missing");
        assert!(envelope.is_some());
    }

    #[test]
    fn malformed_envelope_is_protocol_error() {
        let mut snap = ResponseSnapshot::new(200, "");
        snap.headers.insert(
            "content-type".to_string(),
            "application/json+openhim".to_string(),
        );
        snap.body = "not json".to_string();

        let err = unwrap_envelope(snap, "r1").unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn plain_response_passes_through() {
        let snap = snapshot(200, &[("content-type", "application/json")]);
        let (unwrapped, envelope) = unwrap_envelope(snap, "r1").unwrap();
        assert_eq!(unwrapped.status, 200);
        assert!(envelope.is_none());
    }

    #[test]
    fn render_set_cookie_round_trip() {
        let cookie = SetCookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            max_age: Some(60),
            expires: None,
            path: Some("/".to_string()),
            domain: None,
            secure: true,
            http_only: true,
        };
        let rendered = render_set_cookie(&cookie);
        let reparsed = parse_set_cookie(&rendered).unwrap();
        assert_eq!(reparsed.name, "sid");
        assert_eq!(reparsed.max_age, Some(60));
        assert!(reparsed.secure);
        assert!(reparsed.http_only);
    }
}
