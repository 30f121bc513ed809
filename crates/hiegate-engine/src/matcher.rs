//! Channel matching: select the single routing policy applicable to an
//! inbound request.
//!
//! Channels are evaluated in ascending priority order; the first channel
//! satisfying every predicate wins. Matching nothing is not an error — the
//! caller surfaces it as a 404.

use hiegate_core::{Channel, ContentMatchRule};
use regex::Regex;
use tracing::{debug, error, warn};

/// The facts about an inbound request the matcher looks at.
#[derive(Debug, Clone)]
pub struct RequestDescriptor<'a> {
    pub path: &'a str,
    pub method: &'a str,
    /// Raw `Content-Type` header value, if present.
    pub content_type: Option<&'a str>,
    /// Textual request body, if available.
    pub body: Option<&'a str>,
}

/// Result of a matching pass.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// The first fully matching channel.
    Matched(Channel),
    /// A channel matched on everything except its method allow-list and no
    /// later channel matched fully; the caller shapes this into a 405.
    MethodNotAllowed { channel: Channel, allowed: Vec<String> },
    /// No channel applies; surfaced as a 404 by the caller.
    NoMatch,
}

/// Match a request against a priority-ordered channel list.
pub fn match_channel(channels: &[Channel], request: &RequestDescriptor<'_>) -> MatchOutcome {
    let mut method_miss: Option<&Channel> = None;

    for channel in channels {
        if !channel.is_enabled() {
            continue;
        }

        // Unanchored substring match against the path. An invalid pattern
        // makes the channel non-matching, never fails the request.
        let pattern = match Regex::new(&channel.url_pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(channel = %channel.name, error = %e, "invalid urlPattern, skipping channel");
                continue;
            }
        };
        if !pattern.is_match(request.path) {
            continue;
        }

        if !content_type_matches(channel, request.content_type) {
            continue;
        }

        let method_ok = channel.methods.is_empty()
            || channel
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(request.method));

        if !method_ok {
            // Only remember the channel for the 405 if nothing else about
            // it fails either.
            if content_rule_matches(channel, request.body) && method_miss.is_none() {
                method_miss = Some(channel);
            }
            continue;
        }

        if !content_rule_matches(channel, request.body) {
            continue;
        }

        debug!(channel = %channel.name, path = request.path, "channel matched");
        return MatchOutcome::Matched(channel.clone());
    }

    if let Some(channel) = method_miss {
        return MatchOutcome::MethodNotAllowed {
            allowed: channel.methods.clone(),
            channel: channel.clone(),
        };
    }

    MatchOutcome::NoMatch
}

/// Declared media type (parameters stripped, trimmed) must be in the
/// channel's allow-list; an absent header never matches a non-empty list.
fn content_type_matches(channel: &Channel, content_type: Option<&str>) -> bool {
    if channel.match_content_types.is_empty() {
        return true;
    }
    let Some(raw) = content_type else {
        return false;
    };
    let media_type = raw.split(';').next().unwrap_or("").trim();
    channel
        .match_content_types
        .iter()
        .any(|m| m.eq_ignore_ascii_case(media_type))
}

fn content_rule_matches(channel: &Channel, body: Option<&str>) -> bool {
    let Some(rule) = &channel.content_match else {
        return true;
    };

    match rule {
        ContentMatchRule::Regex { expression } => {
            let Some(body) = body else { return false };
            match Regex::new(expression) {
                Ok(re) => re.is_match(body),
                Err(e) => {
                    warn!(channel = %channel.name, error = %e, "invalid content-match regex");
                    false
                }
            }
        }
        ContentMatchRule::XPath { expression, value } => {
            let Some(expected) = value else {
                error!(
                    channel = %channel.name,
                    "xpath content match has no comparison value, channel never matches"
                );
                return false;
            };
            let Some(body) = body else { return false };
            xpath_matches(channel, body, expression, expected)
        }
        ContentMatchRule::JsonPath { expression, value } => {
            let Some(expected) = value else {
                error!(
                    channel = %channel.name,
                    "jsonpath content match has no comparison value, channel never matches"
                );
                return false;
            };
            let Some(body) = body else { return false };
            jsonpath_matches(channel, body, expression, expected)
        }
    }
}

/// Evaluate the XPath against the parsed XML body and compare the extracted
/// string for exact equality.
fn xpath_matches(channel: &Channel, body: &str, expression: &str, expected: &str) -> bool {
    let package = match sxd_document::parser::parse(body) {
        Ok(p) => p,
        Err(e) => {
            debug!(channel = %channel.name, error = %e, "body is not parseable XML");
            return false;
        }
    };
    let document = package.as_document();
    match sxd_xpath::evaluate_xpath(&document, expression) {
        Ok(value) => value.string() == expected,
        Err(e) => {
            warn!(channel = %channel.name, error = %e, "invalid xpath expression");
            false
        }
    }
}

/// Evaluate the JSONPath against the parsed JSON body and compare the first
/// extracted node for exact equality.
fn jsonpath_matches(channel: &Channel, body: &str, expression: &str, expected: &str) -> bool {
    let json: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            debug!(channel = %channel.name, error = %e, "body is not parseable JSON");
            return false;
        }
    };
    let path = match serde_json_path::JsonPath::parse(expression) {
        Ok(p) => p,
        Err(e) => {
            warn!(channel = %channel.name, error = %e, "invalid jsonpath expression");
            return false;
        }
    };
    match path.query(&json).first() {
        Some(serde_json::Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiegate_core::ChannelStatus;

    fn channel(name: &str, priority: i64, pattern: &str) -> Channel {
        Channel {
            id: name.to_string(),
            name: name.to_string(),
            priority,
            status: ChannelStatus::Enabled,
            url_pattern: pattern.to_string(),
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

    fn request<'a>(path: &'a str, method: &'a str) -> RequestDescriptor<'a> {
        RequestDescriptor {
            path,
            method,
            content_type: None,
            body: None,
        }
    }

    #[test]
    fn url_pattern_gates_selection() {
        let channels = vec![channel("labs", 1, "^/labs")];
        assert!(matches!(
            match_channel(&channels, &request("/labs/orders", "GET")),
            MatchOutcome::Matched(c) if c.name == "labs"
        ));
        assert!(matches!(
            match_channel(&channels, &request("/pharmacy", "GET")),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn pattern_is_unanchored_substring() {
        let channels = vec![channel("any", 1, "orders")];
        assert!(matches!(
            match_channel(&channels, &request("/labs/orders/7", "GET")),
            MatchOutcome::Matched(_)
        ));
    }

    #[test]
    fn first_by_priority_wins() {
        let channels = vec![channel("first", 1, "^/x"), channel("second", 2, "^/x")];
        assert!(matches!(
            match_channel(&channels, &request("/x", "GET")),
            MatchOutcome::Matched(c) if c.name == "first"
        ));
    }

    #[test]
    fn disabled_and_deleted_never_match() {
        let mut disabled = channel("off", 1, "^/x");
        disabled.status = ChannelStatus::Disabled;
        let mut deleted = channel("gone", 2, "^/x");
        deleted.status = ChannelStatus::Deleted;
        assert!(matches!(
            match_channel(&[disabled, deleted], &request("/x", "GET")),
            MatchOutcome::NoMatch
        ));
    }

    #[test]
    fn content_type_parameters_are_stripped() {
        let mut ch = channel("json", 1, "^/x");
        ch.match_content_types = vec!["application/json".to_string()];
        let channels = vec![ch];

        let mut req = request("/x", "POST");
        req.content_type = Some("application/json; charset=utf-8");
        assert!(matches!(
            match_channel(&channels, &req),
            MatchOutcome::Matched(_)
        ));

        req.content_type = Some("text/plain");
        assert!(matches!(match_channel(&channels, &req), MatchOutcome::NoMatch));

        // Absent header never matches a non-empty allow-list.
        req.content_type = None;
        assert!(matches!(match_channel(&channels, &req), MatchOutcome::NoMatch));
    }

    #[test]
    fn method_only_miss_becomes_405() {
        let mut ch = channel("readonly", 1, "^/x");
        ch.methods = vec!["GET".to_string(), "HEAD".to_string()];
        let outcome = match_channel(&[ch], &request("/x", "POST"));
        match outcome {
            MatchOutcome::MethodNotAllowed { allowed, .. } => {
                assert_eq!(allowed, vec!["GET".to_string(), "HEAD".to_string()]);
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn method_check_is_case_insensitive() {
        let mut ch = channel("readonly", 1, "^/x");
        ch.methods = vec!["get".to_string()];
        assert!(matches!(
            match_channel(&[ch], &request("/x", "GET")),
            MatchOutcome::Matched(_)
        ));
    }

    #[test]
    fn later_full_match_beats_earlier_method_miss() {
        let mut first = channel("first", 1, "^/x");
        first.methods = vec!["GET".to_string()];
        let second = channel("second", 2, "^/x");
        assert!(matches!(
            match_channel(&[first, second], &request("/x", "POST")),
            MatchOutcome::Matched(c) if c.name == "second"
        ));
    }

    #[test]
    fn regex_content_rule_is_substring() {
        let mut ch = channel("hl7", 1, "^/x");
        ch.content_match = Some(ContentMatchRule::Regex {
            expression: "MSH\\|".to_string(),
        });
        let mut req = request("/x", "POST");
        req.body = Some("MSH|^~\\&|SENDER|...");
        assert!(matches!(
            match_channel(std::slice::from_ref(&ch), &req),
            MatchOutcome::Matched(_)
        ));
        req.body = Some("no segment here");
        assert!(matches!(match_channel(&[ch], &req), MatchOutcome::NoMatch));
    }

    #[test]
    fn jsonpath_rule_compares_extracted_value() {
        let mut ch = channel("adt", 1, "^/x");
        ch.content_match = Some(ContentMatchRule::JsonPath {
            expression: "$.messageType".to_string(),
            value: Some("ADT".to_string()),
        });
        let mut req = request("/x", "POST");
        req.body = Some(r#"{"messageType": "ADT"}"#);
        assert!(matches!(
            match_channel(std::slice::from_ref(&ch), &req),
            MatchOutcome::Matched(_)
        ));
        req.body = Some(r#"{"messageType": "ORU"}"#);
        assert!(matches!(match_channel(&[ch], &req), MatchOutcome::NoMatch));
    }

    #[test]
    fn xpath_rule_compares_extracted_value() {
        let mut ch = channel("xml", 1, "^/x");
        ch.content_match = Some(ContentMatchRule::XPath {
            expression: "/message/@type".to_string(),
            value: Some("ADT".to_string()),
        });
        let mut req = request("/x", "POST");
        req.body = Some(r#"<message type="ADT"/>"#);
        assert!(matches!(
            match_channel(std::slice::from_ref(&ch), &req),
            MatchOutcome::Matched(_)
        ));
        req.body = Some(r#"<message type="ORU"/>"#);
        assert!(matches!(match_channel(&[ch], &req), MatchOutcome::NoMatch));
    }

    #[test]
    fn extraction_rule_without_value_never_matches() {
        let mut ch = channel("broken", 1, "^/x");
        ch.content_match = Some(ContentMatchRule::JsonPath {
            expression: "$.messageType".to_string(),
            value: None,
        });
        let mut req = request("/x", "POST");
        req.body = Some(r#"{"messageType": "ADT"}"#);
        assert!(matches!(match_channel(&[ch], &req), MatchOutcome::NoMatch));
    }

    #[test]
    fn invalid_url_pattern_skips_channel() {
        let broken = channel("broken", 1, "([unclosed");
        let healthy = channel("healthy", 2, "^/x");
        assert!(matches!(
            match_channel(&[broken, healthy], &request("/x", "GET")),
            MatchOutcome::Matched(c) if c.name == "healthy"
        ));
    }
}
