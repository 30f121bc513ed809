//! Response-body URL rewriting: backend-internal links are mapped onto the
//! gateway's externally reachable address before the body is returned.
//!
//! Links are located by pattern matching on `href`/`src`/`fullUrl`
//! attributes (XML and JSON quoting), not by full document parsing.

use std::sync::LazyLock;

use hiegate_core::{Channel, Result, RewriteRule};
use regex::{Captures, Regex};
use tracing::{debug, warn};
use url::Url;

use crate::pathsub::{self, PathTransform};

/// href="..." / src='...' in XML, "href":"..." in JSON.
static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"((?:href|src|fullUrl)\s*=\s*|"(?:href|src|fullUrl)"\s*:\s*)(["'])([^"']*)(["'])"#)
        .expect("link pattern is valid")
});

/// Rewrites backend URLs in response bodies onto the gateway's external
/// address.
#[derive(Debug, Clone)]
pub struct Rewriter {
    /// Hostname clients reach the gateway on.
    pub external_hostname: String,
    /// External plain-HTTP port.
    pub http_port: u16,
    /// External HTTPS port; rewritten URLs targeting it get the `https`
    /// scheme.
    pub https_port: u16,
}

impl Rewriter {
    /// Rewrite `body` for `channel`. `secured` reflects the transport the
    /// client used, and selects which external port auto-derived rules
    /// target. A channel without rewriting enabled passes through
    /// untouched.
    pub fn rewrite(
        &self,
        body: &str,
        channel: &Channel,
        all_channels: &[Channel],
        secured: bool,
    ) -> Result<String> {
        if !channel.rewrite_urls {
            return Ok(body.to_string());
        }

        let rules = self.rule_set(channel, all_channels, secured);
        let current_base = channel
            .primary_route()
            .ok()
            .map(|route| (route.host.clone(), route.port));

        let rewritten = LINK_PATTERN.replace_all(body, |caps: &Captures<'_>| {
            let original = &caps[3];
            match self.rewrite_url(original, &rules, current_base.as_ref()) {
                Some(new_url) => format!("{}{}{}{}", &caps[1], &caps[2], new_url, &caps[4]),
                None => caps[0].to_string(),
            }
        });

        Ok(rewritten.into_owned())
    }

    /// Explicit rules first, then one virtual rule per *other* enabled
    /// channel's primary route, with that route's path transform inverted
    /// so a link the backend emits about itself lands on the proxying
    /// channel.
    fn rule_set(
        &self,
        channel: &Channel,
        all_channels: &[Channel],
        secured: bool,
    ) -> Vec<RewriteRule> {
        let mut rules = channel.rewrite_urls_config.clone();
        if !channel.add_auto_rewrite_rules {
            return rules;
        }

        let to_port = if secured { self.https_port } else { self.http_port };
        for other in all_channels {
            if other.id == channel.id || !other.is_enabled() {
                continue;
            }
            let Ok(primary) = other.primary_route() else {
                continue;
            };
            let path_transform = match &primary.path_transform {
                Some(expr) => match pathsub::invert(expr) {
                    Ok(inverted) => Some(inverted),
                    Err(e) => {
                        warn!(channel = %other.name, error = %e, "cannot invert path transform, skipping virtual rule");
                        continue;
                    }
                },
                None => None,
            };
            rules.push(RewriteRule {
                from_host: primary.host.clone(),
                from_port: primary.port,
                to_host: self.external_hostname.clone(),
                to_port,
                path_transform,
            });
        }
        rules
    }

    /// Rewrite one URL under first-match-wins rule selection. Returns
    /// `None` when no rule applies or the URL is unparseable.
    fn rewrite_url(
        &self,
        original: &str,
        rules: &[RewriteRule],
        current_base: Option<&(String, u16)>,
    ) -> Option<String> {
        let (mut url, relative) = match Url::parse(original) {
            Ok(url) if url.host_str().is_some() => (url, false),
            _ => {
                // No host: treat as relative to the serving channel's
                // primary route so a rule can still match it.
                let (host, port) = current_base?;
                let base = Url::parse(&format!("http://{host}:{port}/")).ok()?;
                (base.join(original).ok()?, true)
            }
        };

        let rule = rules.iter().find(|rule| {
            url.host_str() == Some(rule.from_host.as_str())
                && url.port_or_known_default() == Some(rule.from_port)
        })?;

        let scheme = if rule.to_port == self.https_port {
            "https"
        } else {
            "http"
        };
        url.set_scheme(scheme).ok()?;
        url.set_host(Some(&rule.to_host)).ok()?;
        let default_port = (scheme == "http" && rule.to_port == 80)
            || (scheme == "https" && rule.to_port == 443);
        url.set_port(if default_port { None } else { Some(rule.to_port) })
            .ok()?;

        if let Some(expr) = &rule.path_transform {
            match PathTransform::parse(expr) {
                Ok(transform) => {
                    let new_path = transform.apply(url.path());
                    url.set_path(&new_path);
                }
                Err(e) => {
                    warn!(error = %e, "invalid rewrite path transform, leaving path unchanged");
                }
            }
        }

        if relative {
            // Strip host/port/protocol back out so the link stays relative.
            return Some(url[url::Position::BeforePath..].to_string());
        }

        debug!(from = original, to = %url, "rewrote backend url");
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiegate_core::{ChannelStatus, Route, RouteProtocol};

    fn route(host: &str, port: u16, transform: Option<&str>) -> Route {
        Route {
            name: format!("{host}-route"),
            protocol: RouteProtocol::Http,
            host: host.to_string(),
            port,
            enabled: true,
            primary: true,
            path: None,
            path_transform: transform.map(|t| t.to_string()),
            username: None,
            password: None,
            cert: None,
            timeout_ms: None,
            forward_auth_header: false,
        }
    }

    fn channel(id: &str, routes: Vec<Route>) -> Channel {
        Channel {
            id: id.to_string(),
            name: id.to_string(),
            priority: 1,
            status: ChannelStatus::Enabled,
            url_pattern: "^/".to_string(),
            match_content_types: vec![],
            content_match: None,
            methods: vec![],
            allow: vec![],
            whitelist: vec![],
            routes,
            rewrite_urls: true,
            add_auto_rewrite_rules: false,
            rewrite_urls_config: vec![],
            timeout_ms: None,
        }
    }

    fn rewriter() -> Rewriter {
        Rewriter {
            external_hostname: "hie.example.org".to_string(),
            http_port: 5001,
            https_port: 5000,
        }
    }

    #[test]
    fn disabled_rewriting_is_a_no_op() {
        let mut ch = channel("a", vec![route("backend", 8080, None)]);
        ch.rewrite_urls = false;
        let body = r#"<a href="http://backend:8080/x"/>"#;
        assert_eq!(rewriter().rewrite(body, &ch, &[], false).unwrap(), body);
    }

    #[test]
    fn explicit_rule_rewrites_host_and_port() {
        let mut ch = channel("a", vec![route("backend", 8080, None)]);
        ch.rewrite_urls_config = vec![RewriteRule {
            from_host: "backend".to_string(),
            from_port: 8080,
            to_host: "hie.example.org".to_string(),
            to_port: 5001,
            path_transform: None,
        }];
        let body = r#"<link href="http://backend:8080/fhir/Patient/1"/>"#;
        let out = rewriter().rewrite(body, &ch, &[], false).unwrap();
        assert_eq!(
            out,
            r#"<link href="http://hie.example.org:5001/fhir/Patient/1"/>"#
        );
    }

    #[test]
    fn https_scheme_applied_for_external_https_port() {
        let mut ch = channel("a", vec![route("backend", 8080, None)]);
        ch.rewrite_urls_config = vec![RewriteRule {
            from_host: "backend".to_string(),
            from_port: 8080,
            to_host: "hie.example.org".to_string(),
            to_port: 5000,
            path_transform: None,
        }];
        let body = r#"{"fullUrl":"http://backend:8080/fhir/Patient/1"}"#;
        let out = rewriter().rewrite(body, &ch, &[], true).unwrap();
        assert_eq!(
            out,
            r#"{"fullUrl":"https://hie.example.org:5000/fhir/Patient/1"}"#
        );
    }

    #[test]
    fn rule_port_80_matches_url_without_explicit_port() {
        let mut ch = channel("a", vec![route("backend", 8080, None)]);
        ch.rewrite_urls_config = vec![RewriteRule {
            from_host: "backend".to_string(),
            from_port: 80,
            to_host: "hie.example.org".to_string(),
            to_port: 5001,
            path_transform: None,
        }];
        let body = r#"<a href="http://backend/x"/>"#;
        let out = rewriter().rewrite(body, &ch, &[], false).unwrap();
        assert_eq!(out, r#"<a href="http://hie.example.org:5001/x"/>"#);
    }

    #[test]
    fn virtual_rule_derived_from_other_channel_with_inverted_transform() {
        let mut serving = channel("serving", vec![route("backend-a", 8080, None)]);
        serving.add_auto_rewrite_rules = true;
        // The other channel proxies backend-b and maps /csd onto /ihris, so
        // links backend-b emits about itself (/ihris) must come back as the
        // channel-facing /csd path.
        let other = channel("other", vec![route("backend-b", 9090, Some("s/csd/ihris/"))]);

        let body = r#"<a href="http://backend-b:9090/ihris/providers"/>"#;
        let out = rewriter()
            .rewrite(body, &serving, &[serving.clone(), other], false)
            .unwrap();
        assert_eq!(
            out,
            r#"<a href="http://hie.example.org:5001/csd/providers"/>"#
        );
    }

    #[test]
    fn virtual_rules_skip_self_and_disabled_channels() {
        let mut serving = channel("serving", vec![route("backend-a", 8080, None)]);
        serving.add_auto_rewrite_rules = true;
        let mut disabled = channel("off", vec![route("backend-c", 7070, None)]);
        disabled.status = ChannelStatus::Disabled;

        // Link to the serving channel's own backend: no rule (self skipped).
        let body = r#"<a href="http://backend-a:8080/x"/><a href="http://backend-c:7070/y"/>"#;
        let out = rewriter()
            .rewrite(body, &serving, &[serving.clone(), disabled], false)
            .unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn relative_url_matches_current_backend_and_stays_relative() {
        let mut ch = channel("a", vec![route("backend", 8080, Some("s/public/internal/"))]);
        ch.rewrite_urls_config = vec![RewriteRule {
            from_host: "backend".to_string(),
            from_port: 8080,
            to_host: "hie.example.org".to_string(),
            to_port: 5001,
            path_transform: Some("s/internal/public/".to_string()),
        }];
        let body = r#"<a href="/internal/Patient/1?x=1"/>"#;
        let out = rewriter().rewrite(body, &ch, &[], false).unwrap();
        assert_eq!(out, r#"<a href="/public/Patient/1?x=1"/>"#);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut ch = channel("a", vec![route("backend", 8080, None)]);
        ch.rewrite_urls_config = vec![
            RewriteRule {
                from_host: "backend".to_string(),
                from_port: 8080,
                to_host: "first.example.org".to_string(),
                to_port: 5001,
                path_transform: None,
            },
            RewriteRule {
                from_host: "backend".to_string(),
                from_port: 8080,
                to_host: "second.example.org".to_string(),
                to_port: 5001,
                path_transform: None,
            },
        ];
        let body = r#"<a href="http://backend:8080/x"/>"#;
        let out = rewriter().rewrite(body, &ch, &[], false).unwrap();
        assert!(out.contains("first.example.org"));
        assert!(!out.contains("second.example.org"));
    }

    #[test]
    fn unmatched_urls_left_alone() {
        let mut ch = channel("a", vec![route("backend", 8080, None)]);
        ch.rewrite_urls_config = vec![RewriteRule {
            from_host: "backend".to_string(),
            from_port: 8080,
            to_host: "hie.example.org".to_string(),
            to_port: 5001,
            path_transform: None,
        }];
        let body = r#"<a href="http://unrelated:9999/x"/>"#;
        assert_eq!(rewriter().rewrite(body, &ch, &[], false).unwrap(), body);
    }
}
