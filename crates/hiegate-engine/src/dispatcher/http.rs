//! HTTP and HTTPS route execution.
//!
//! Reproduces the inbound request toward the backend (method, headers,
//! query, body), applies the route's path override or transform, and
//! normalizes the response: transparent gzip/deflate decompression and
//! charset-aware text decoding.

use std::io::Read;
use std::time::Duration;

use hiegate_core::{CoreError, RequestSnapshot, ResponseSnapshot, Result, Route, RouteProtocol};
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::pathsub::PathTransform;

use super::{HEADER_VALUE_SEPARATOR, InboundRequest, now};

/// Execute one HTTP(S) route. Returns the request snapshot alongside the
/// result so a failed route still records what was sent.
pub(super) async fn execute(
    client: &reqwest::Client,
    route: &Route,
    inbound: &InboundRequest,
    timeout_ms: u64,
) -> (RequestSnapshot, Result<ResponseSnapshot>) {
    let path = match route_path(route, &inbound.path) {
        Ok(p) => p,
        Err(e) => {
            let snapshot = request_snapshot(route, inbound, inbound.path.clone());
            return (snapshot, Err(e));
        }
    };

    let snapshot = request_snapshot(route, inbound, path.clone());
    let result = send(client, route, inbound, path, timeout_ms).await;
    (snapshot, result)
}

/// Fixed path wins over a transform; with neither, the inbound path passes
/// through unchanged.
fn route_path(route: &Route, inbound_path: &str) -> Result<String> {
    if let Some(path) = &route.path {
        return Ok(path.clone());
    }
    if let Some(expr) = &route.path_transform {
        return Ok(PathTransform::parse(expr)?.apply(inbound_path));
    }
    Ok(inbound_path.to_string())
}

fn request_snapshot(route: &Route, inbound: &InboundRequest, path: String) -> RequestSnapshot {
    RequestSnapshot {
        method: inbound.method.clone(),
        path,
        query: inbound.query.clone(),
        headers: forwarded_headers(route, inbound),
        body: String::from_utf8(inbound.body.to_vec()).ok(),
        timestamp: now(),
    }
}

/// Headers reproduced toward the backend: `Host` is always stripped and
/// `Authorization` is stripped unless the route forwards it.
fn forwarded_headers(route: &Route, inbound: &InboundRequest) -> IndexMap<String, String> {
    inbound
        .headers
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            if lower == "host" {
                return false;
            }
            if lower == "authorization" && !route.forward_auth_header {
                return false;
            }
            true
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

async fn send(
    client: &reqwest::Client,
    route: &Route,
    inbound: &InboundRequest,
    path: String,
    timeout_ms: u64,
) -> Result<ResponseSnapshot> {
    let scheme = match route.protocol {
        RouteProtocol::Https => "https",
        _ => "http",
    };
    let mut url = format!("{scheme}://{}:{}{path}", route.host, route.port);
    if let Some(query) = &inbound.query {
        url.push('?');
        url.push_str(query);
    }

    let method = reqwest::Method::from_bytes(inbound.method.as_bytes())
        .map_err(|e| CoreError::transport(&route.name, format!("invalid method: {e}")))?;

    let mut headers = HeaderMap::new();
    for (name, value) in forwarded_headers(route, inbound) {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(header_name), Ok(header_value)) => {
                headers.append(header_name, header_value);
            }
            _ => warn!(route = %route.name, header = %name, "dropping invalid header"),
        }
    }

    let mut request = client
        .request(method, &url)
        .headers(headers)
        .body(inbound.body.to_vec())
        .timeout(Duration::from_millis(timeout_ms));

    if let Some(username) = &route.username {
        request = request.basic_auth(username, route.password.as_deref());
    }

    debug!(route = %route.name, %url, "sending http route request");

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            CoreError::timeout(&route.name, timeout_ms)
        } else if e.is_connect() {
            CoreError::transport(&route.name, format!("failed to connect: {e}"))
        } else {
            CoreError::transport(&route.name, format!("request failed: {e}"))
        }
    })?;

    let status = response.status().as_u16();

    let mut response_headers: IndexMap<String, String> = IndexMap::new();
    for (name, value) in response.headers() {
        let value = value.to_str().unwrap_or("").to_string();
        response_headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push(HEADER_VALUE_SEPARATOR);
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let raw = response
        .bytes()
        .await
        .map_err(|e| CoreError::transport(&route.name, format!("failed to read body: {e}")))?;

    let decompressed = decompress(
        &raw,
        header_value(&response_headers, "content-encoding"),
        &route.name,
    )?;
    let body = decode_text(
        &decompressed,
        header_value(&response_headers, "content-type"),
    );

    Ok(ResponseSnapshot {
        status,
        headers: response_headers,
        body,
        timestamp: now(),
    })
}

fn header_value<'a>(headers: &'a IndexMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Transparently undo `gzip`/`deflate` content encodings. A corrupt stream
/// is a transport failure for the route.
fn decompress(raw: &[u8], encoding: Option<&str>, route_name: &str) -> Result<Vec<u8>> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        Some("gzip") => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| {
                    CoreError::transport(route_name, format!("gzip decompression failed: {e}"))
                })?;
            Ok(out)
        }
        Some("deflate") => {
            let mut out = Vec::new();
            flate2::read::ZlibDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| {
                    CoreError::transport(route_name, format!("deflate decompression failed: {e}"))
                })?;
            Ok(out)
        }
        _ => Ok(raw.to_vec()),
    }
}

/// Decode the body text with the charset declared on the content type,
/// defaulting to UTF-8.
fn decode_text(raw: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_label)
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = encoding.decode(raw);
    text.into_owned()
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let mut parts = param.splitn(2, '=');
        let key = parts.next()?.trim();
        if key.eq_ignore_ascii_case("charset") {
            Some(parts.next()?.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn route(primary: bool) -> Route {
        Route {
            name: "backend".to_string(),
            protocol: RouteProtocol::Http,
            host: "localhost".to_string(),
            port: 9000,
            enabled: true,
            primary,
            path: None,
            path_transform: None,
            username: None,
            password: None,
            cert: None,
            timeout_ms: None,
            forward_auth_header: false,
        }
    }

    fn inbound() -> InboundRequest {
        let mut headers = IndexMap::new();
        headers.insert("Host".to_string(), "gateway".to_string());
        headers.insert("Authorization".to_string(), "Basic xyz".to_string());
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        InboundRequest {
            method: "POST".to_string(),
            path: "/CSD/patient".to_string(),
            query: Some("v=1".to_string()),
            headers,
            body: bytes::Bytes::from_static(b"hello"),
        }
    }

    #[test]
    fn host_and_auth_headers_stripped() {
        let headers = forwarded_headers(&route(true), &inbound());
        assert!(!headers.contains_key("Host"));
        assert!(!headers.contains_key("Authorization"));
        assert!(headers.contains_key("Content-Type"));
    }

    #[test]
    fn auth_header_forwarded_when_flagged() {
        let mut r = route(true);
        r.forward_auth_header = true;
        let headers = forwarded_headers(&r, &inbound());
        assert!(headers.contains_key("Authorization"));
    }

    #[test]
    fn fixed_path_beats_transform() {
        let mut r = route(true);
        r.path = Some("/fixed".to_string());
        r.path_transform = Some("s/CSD/ihris/".to_string());
        assert_eq!(route_path(&r, "/CSD/patient").unwrap(), "/fixed");
    }

    #[test]
    fn transform_applied_without_fixed_path() {
        let mut r = route(true);
        r.path_transform = Some("s/CSD/ihris/".to_string());
        assert_eq!(route_path(&r, "/CSD/patient").unwrap(), "/ihris/patient");
    }

    #[test]
    fn inbound_path_passes_through_by_default() {
        assert_eq!(route_path(&route(true), "/CSD/patient").unwrap(), "/CSD/patient");
    }

    #[test]
    fn gzip_bodies_decompressed() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"payload").unwrap();
        let compressed = encoder.finish().unwrap();
        let out = decompress(&compressed, Some("gzip"), "r").unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn corrupt_gzip_is_transport_error() {
        let err = decompress(b"definitely not gzip", Some("gzip"), "r").unwrap_err();
        assert!(matches!(err, CoreError::Transport { .. }));
    }

    #[test]
    fn charset_selected_from_content_type() {
        // "héllo" in latin-1.
        let raw = [0x68, 0xe9, 0x6c, 0x6c, 0x6f];
        let text = decode_text(&raw, Some("text/plain; charset=ISO-8859-1"));
        assert_eq!(text, "héllo");
        // Defaults to utf-8 when no charset is declared.
        assert_eq!(decode_text("héllo".as_bytes(), Some("text/plain")), "héllo");
    }
}
