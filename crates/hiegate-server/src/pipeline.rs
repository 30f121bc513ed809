//! The staged request pipeline: identity, matching, authorization,
//! dispatch, rewriting, and response shaping.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    response::Response,
};
use hiegate_core::{Channel, ClientIdentity, CoreError, DispatchResult};
use hiegate_engine::{
    HEADER_VALUE_SEPARATOR, InboundRequest, MatchOutcome, RequestDescriptor, match_channel,
    render_set_cookie,
};
use indexmap::IndexMap;
use tracing::{debug, error, instrument, warn};

use crate::server::{AppState, ConnectionMeta, PeerAuth};

/// Inbound bodies larger than this are rejected before matching.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Catch-all handler behind every route. Failures never leak internals:
/// the client sees a generic body while the detail goes to the log.
pub async fn handle(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let meta = request
        .extensions()
        .get::<ConnectionMeta>()
        .cloned()
        .unwrap_or_default();

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) if is_length_limit(&err) => {
            warn!(error = %err, "request body exceeds the size limit");
            return plain(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
        // A mid-stream transport failure, not an oversized body.
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return plain(StatusCode::BAD_REQUEST, "Request body could not be read");
        }
    };

    match process(&state, &parts, body, peer_addr, &meta).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "request pipeline failed");
            match err {
                CoreError::Certificate(_) => {
                    plain(StatusCode::BAD_REQUEST, "Invalid client certificate")
                }
                _ => plain(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    hiegate_engine::INTERNAL_ERROR_BODY,
                ),
            }
        }
    }
}

#[instrument(skip_all, fields(method = %parts.method, path = %parts.uri.path()))]
async fn process(
    state: &AppState,
    parts: &axum::http::request::Parts,
    body: axum::body::Bytes,
    peer_addr: Option<SocketAddr>,
    meta: &ConnectionMeta,
) -> hiegate_core::Result<Response> {
    let keystore = state.keystore.keystore().await?;

    let identity = match &meta.peer {
        PeerAuth::Anonymous => None,
        PeerAuth::Invalid(detail) => {
            warn!(detail = %detail, "unreadable client certificate");
            return Ok(plain(StatusCode::BAD_REQUEST, "Invalid client certificate"));
        }
        PeerAuth::Certificate(peer) => {
            let clients = state.channels.clients().await?;
            state.resolver.resolve(peer, &keystore, &clients)?
        }
    };

    let channels = state.channels.channels().await?;
    let body_text = std::str::from_utf8(&body).ok();
    let descriptor = RequestDescriptor {
        path: parts.uri.path(),
        method: parts.method.as_str(),
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        body: body_text,
    };

    let channel = match match_channel(&channels, &descriptor) {
        MatchOutcome::Matched(channel) => channel,
        MatchOutcome::MethodNotAllowed { channel, allowed } => {
            debug!(channel = %channel.name, "method not allowed");
            return Ok(method_not_allowed(parts.method.as_str(), &channel, &allowed));
        }
        MatchOutcome::NoMatch => {
            debug!("no channel matched");
            return Ok(plain(StatusCode::NOT_FOUND, "No channel matched the request"));
        }
    };

    if let Some(response) = check_access(state, &channel, identity.as_ref(), peer_addr).await {
        return Ok(response);
    }

    let inbound = InboundRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: collect_headers(&parts.headers),
        body,
    };

    let mut result = state.dispatcher.dispatch(&channel, &inbound, &keystore).await?;

    if channel.rewrite_urls && is_rewritable(&result) {
        match state
            .rewriter
            .rewrite(&result.response.body, &channel, &channels, meta.secured)
        {
            Ok(rewritten) => result.response.body = rewritten,
            // A bad rewrite rule must not destroy an otherwise good
            // response; the original body goes out instead.
            Err(err) => warn!(channel = %channel.name, error = %err, "url rewriting failed"),
        }
    }

    state.recorder.record(&channel, &result).await;

    Ok(client_response(&result))
}

/// Whether a body-read failure was the size limit tripping, as opposed to
/// the stream breaking underneath it.
fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if inner.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = inner.source();
    }
    false
}

/// Whitelist then allow-list. `None` means the request may proceed.
async fn check_access(
    state: &AppState,
    channel: &Channel,
    identity: Option<&ClientIdentity>,
    peer_addr: Option<SocketAddr>,
) -> Option<Response> {
    if !channel.whitelist.is_empty() {
        let permitted = peer_addr
            .map(|addr| channel.whitelist.contains(&addr.ip()))
            .unwrap_or(false);
        if !permitted {
            warn!(channel = %channel.name, peer = ?peer_addr, "source address not whitelisted");
            return Some(plain(StatusCode::FORBIDDEN, "Access denied"));
        }
    }

    if !state.authorizer.authorize(identity, channel).await {
        warn!(
            channel = %channel.name,
            client = identity.map(|i| i.client_id.as_str()).unwrap_or("anonymous"),
            "client not authorized for channel"
        );
        return Some(plain(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    None
}

/// Only textual XML/JSON payloads are candidates for link rewriting;
/// everything else passes through byte-identical.
fn is_rewritable(result: &DispatchResult) -> bool {
    result
        .response
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| {
            let value = value.to_ascii_lowercase();
            value.contains("xml") || value.contains("json")
        })
        .unwrap_or(false)
}

/// Duplicate inbound headers are preserved by joining their values with
/// the separator the dispatcher splits on.
fn collect_headers(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut collected: IndexMap<String, String> = IndexMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            debug!(header = %name, "dropping non-utf8 header value");
            continue;
        };
        match collected.get_mut(name.as_str()) {
            Some(existing) => {
                existing.push(HEADER_VALUE_SEPARATOR);
                existing.push_str(value);
            }
            None => {
                collected.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }
    collected
}

/// Turn the canonical client response into an HTTP response, re-expanding
/// joined multi-value headers and rendering structured cookies.
fn client_response(result: &DispatchResult) -> Response {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(result.response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );

    if let Some(headers) = builder.headers_mut() {
        for (name, joined) in &result.response.headers {
            let Ok(name) = HeaderName::try_from(name.as_str()) else {
                debug!(header = %name, "dropping invalid response header name");
                continue;
            };
            for value in joined.split(HEADER_VALUE_SEPARATOR) {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(name.clone(), value);
                    }
                    Err(_) => debug!(header = %name, "dropping invalid response header value"),
                }
            }
        }
        for cookie in &result.response.cookies {
            if let Ok(value) = HeaderValue::from_str(&render_set_cookie(cookie)) {
                headers.append(header::SET_COOKIE, value);
            }
        }
        if let Some(location) = &result.response.redirect {
            if !headers.contains_key(header::LOCATION) {
                if let Ok(value) = HeaderValue::from_str(location) {
                    headers.insert(header::LOCATION, value);
                }
            }
        }
    }

    builder
        .body(Body::from(result.response.body.clone()))
        .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, hiegate_engine::INTERNAL_ERROR_BODY))
}

fn method_not_allowed(method: &str, channel: &Channel, allowed: &[String]) -> Response {
    let allow = allowed.join(", ");
    let body = format!(
        "{method} is not allowed on channel '{}'; allowed methods: {allow}",
        channel.name
    );
    let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, &body);
    if let Ok(value) = HeaderValue::from_str(&allow) {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}

fn plain(status: StatusCode, body: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}
