//! Channel and route definitions — the routing policies the gateway matches
//! inbound requests against and the backend targets it fans out to.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Lifecycle status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Enabled,
    Disabled,
    Deleted,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        ChannelStatus::Enabled
    }
}

/// Body-content matching rule applied after the cheaper channel predicates.
///
/// An `xpath`/`jsonpath` rule without a comparison value is invalid
/// configuration: it never matches and is logged as a configuration error
/// by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentMatchRule {
    /// Substring regex test against the raw body.
    Regex { expression: String },
    /// XPath extraction compared for exact equality.
    XPath {
        expression: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// JSONPath extraction compared for exact equality.
    JsonPath {
        expression: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
}

/// Transport used to reach one backend route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteProtocol {
    Http,
    Https,
    Tcp,
    Tls,
    Mllp,
}

impl RouteProtocol {
    /// Whether this route is reached with an HTTP request (as opposed to a
    /// raw socket write).
    pub fn is_http(&self) -> bool {
        matches!(self, RouteProtocol::Http | RouteProtocol::Https)
    }

    /// Whether the connection to the backend is TLS-wrapped.
    pub fn is_secured(&self) -> bool {
        matches!(self, RouteProtocol::Https | RouteProtocol::Tls)
    }
}

/// One backend target within a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,

    #[serde(rename = "type")]
    pub protocol: RouteProtocol,

    pub host: String,
    pub port: u16,

    /// Disabled routes are skipped entirely during dispatch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// The primary route's response becomes the client-visible response.
    #[serde(default)]
    pub primary: bool,

    /// Fixed request path, overriding the inbound path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// sed-style path substitution (`s/from/to[/g]`) applied to the inbound
    /// path when no fixed path is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_transform: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Trust-anchor fingerprint this backend's certificate must chain to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Forward the inbound `Authorization` header to this backend.
    #[serde(default)]
    pub forward_auth_header: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Route {
    fn default() -> Self {
        Self {
            name: String::new(),
            protocol: RouteProtocol::Http,
            host: String::new(),
            port: 80,
            enabled: true,
            primary: false,
            path: None,
            path_transform: None,
            username: None,
            password: None,
            cert: None,
            timeout_ms: None,
            forward_auth_header: false,
        }
    }
}

/// URL-rewrite rule mapping a backend address onto an external one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRule {
    pub from_host: String,
    pub from_port: u16,
    pub to_host: String,
    pub to_port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_transform: Option<String>,
}

/// A routing policy: match criteria plus the ordered backend targets a
/// matching request is fanned out to.
///
/// Channels are immutable snapshots for the duration of one request; the
/// store hands out a fresh priority-ordered list per request so no locking
/// is needed in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,

    /// Lower priority values are considered first.
    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub status: ChannelStatus,

    /// Unanchored regex tested against the request path.
    pub url_pattern: String,

    /// Accepted media types (parameters stripped before comparison).
    /// Empty means any content type.
    #[serde(default)]
    pub match_content_types: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_match: Option<ContentMatchRule>,

    /// Allowed HTTP methods, case-insensitive. Empty means any method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Client roles or client ids granted access. Empty means open access.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Source addresses granted access. Empty means any source.
    #[serde(default)]
    pub whitelist: Vec<std::net::IpAddr>,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub rewrite_urls: bool,

    #[serde(default)]
    pub add_auto_rewrite_rules: bool,

    #[serde(default)]
    pub rewrite_urls_config: Vec<RewriteRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            priority: 0,
            status: ChannelStatus::Enabled,
            url_pattern: String::new(),
            match_content_types: vec![],
            content_match: None,
            methods: vec![],
            allow: vec![],
            whitelist: vec![],
            routes: vec![],
            rewrite_urls: false,
            add_auto_rewrite_rules: false,
            rewrite_urls_config: vec![],
            timeout_ms: None,
        }
    }
}

impl Channel {
    /// Whether this channel participates in matching at all.
    pub fn is_enabled(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }

    /// Enabled routes in declaration order.
    pub fn enabled_routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(|r| r.enabled)
    }

    /// The single enabled primary route.
    ///
    /// Zero or more than one enabled primary route is a dispatch-time
    /// configuration error; it is rejected before any network I/O.
    pub fn primary_route(&self) -> Result<&Route> {
        let mut primaries = self.enabled_routes().filter(|r| r.primary);
        match (primaries.next(), primaries.next()) {
            (Some(route), None) => Ok(route),
            (None, _) => Err(CoreError::configuration(format!(
                "channel '{}' has no enabled primary route",
                self.name
            ))),
            (Some(_), Some(_)) => Err(CoreError::configuration(format!(
                "channel '{}' has more than one enabled primary route",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, primary: bool, enabled: bool) -> Route {
        Route {
            name: name.to_string(),
            protocol: RouteProtocol::Http,
            host: "localhost".to_string(),
            port: 8080,
            enabled,
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

    fn channel(routes: Vec<Route>) -> Channel {
        Channel {
            id: "c1".to_string(),
            name: "test".to_string(),
            priority: 1,
            status: ChannelStatus::Enabled,
            url_pattern: "^/test".to_string(),
            match_content_types: vec![],
            content_match: None,
            methods: vec![],
            allow: vec![],
            whitelist: vec![],
            routes,
            rewrite_urls: false,
            add_auto_rewrite_rules: false,
            rewrite_urls_config: vec![],
            timeout_ms: None,
        }
    }

    #[test]
    fn primary_route_single() {
        let ch = channel(vec![route("a", true, true), route("b", false, true)]);
        assert_eq!(ch.primary_route().unwrap().name, "a");
    }

    #[test]
    fn primary_route_none_is_error() {
        let ch = channel(vec![route("a", false, true)]);
        assert!(matches!(
            ch.primary_route(),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn primary_route_duplicate_is_error() {
        let ch = channel(vec![route("a", true, true), route("b", true, true)]);
        assert!(matches!(
            ch.primary_route(),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn disabled_primary_not_counted() {
        // A disabled second primary must not trip the duplicate check.
        let ch = channel(vec![route("a", true, true), route("b", true, false)]);
        assert_eq!(ch.primary_route().unwrap().name, "a");
    }

    #[test]
    fn deserializes_camel_case() {
        let json = r#"{
            "id": "ch-1",
            "name": "demo",
            "urlPattern": "^/demo",
            "addAutoRewriteRules": true,
            "routes": [{
                "name": "main",
                "type": "https",
                "host": "backend",
                "port": 443,
                "primary": true,
                "forwardAuthHeader": true
            }]
        }"#;
        let ch: Channel = serde_json::from_str(json).unwrap();
        assert!(ch.add_auto_rewrite_rules);
        assert_eq!(ch.routes[0].protocol, RouteProtocol::Https);
        assert!(ch.routes[0].forward_auth_header);
        assert!(ch.routes[0].enabled);
    }
}
