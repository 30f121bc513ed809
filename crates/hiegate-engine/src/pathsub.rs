//! sed-style path substitution (`s/<from>/<to>[/g]`) and its inversion.
//!
//! Used by the dispatcher to transform inbound paths onto a route, and by
//! the URL rewriter (inverted) to map links a backend emits about itself
//! back onto the channel that proxies it.

use hiegate_core::{CoreError, Result};
use regex::Regex;

/// A parsed substitution expression.
#[derive(Debug, Clone)]
pub struct PathTransform {
    from: Regex,
    to: String,
    global: bool,
}

/// Split an expression on unescaped slashes, leaving `\/` escapes intact
/// inside the returned fields.
fn split_fields(expr: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'/') {
            chars.next();
            current.push_str("\\/");
        } else if c == '/' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

impl PathTransform {
    /// Parse `s/<from>/<to>[/flags]`. `from` is compiled as a regex; a
    /// `g` flag makes the substitution global.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields = split_fields(expr);
        if fields.len() < 3 || fields.len() > 4 || fields[0] != "s" {
            return Err(CoreError::configuration(format!(
                "invalid path transform '{expr}': expected s/<from>/<to>[/g]"
            )));
        }
        let from = Regex::new(&fields[1])?;
        // Replacement text takes literal slashes; the escape was only for
        // field splitting.
        let to = fields[2].replace("\\/", "/");
        let global = fields.get(3).is_some_and(|f| f.contains('g'));
        Ok(Self { from, to, global })
    }

    /// Apply the substitution to a path, replacing the first match or all
    /// matches when the `g` flag is set.
    pub fn apply(&self, path: &str) -> String {
        if self.global {
            self.from.replace_all(path, self.to.as_str()).into_owned()
        } else {
            self.from.replace(path, self.to.as_str()).into_owned()
        }
    }
}

/// Invert an expression by swapping its `from` and `to` fields, preserving
/// any trailing flags.
///
/// Escaped slashes stay escaped in the swapped fields, so reassembly never
/// mis-splits on literal slashes and an empty `to` round-trips.
pub fn invert(expr: &str) -> Result<String> {
    let fields = split_fields(expr);
    if fields.len() < 3 || fields.len() > 4 || fields[0] != "s" {
        return Err(CoreError::configuration(format!(
            "invalid path transform '{expr}': expected s/<from>/<to>[/g]"
        )));
    }
    let mut inverted = format!("s/{}/{}", fields[2], fields[1]);
    if let Some(flags) = fields.get(3) {
        inverted.push('/');
        inverted.push_str(flags);
    }
    Ok(inverted)
}

/// Convenience wrapper: parse and apply in one step.
pub fn transform(path: &str, expr: &str) -> Result<String> {
    Ok(PathTransform::parse(expr)?.apply(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_first_match() {
        assert_eq!(transform("/CSD/patient", "s/CSD/ihris/").unwrap(), "/ihris/patient");
    }

    #[test]
    fn non_global_replaces_only_first() {
        assert_eq!(transform("/a/a/a", "s/a/b/").unwrap(), "/b/a/a");
    }

    #[test]
    fn global_flag_replaces_all() {
        assert_eq!(transform("/a/a/a", "s/a/b/g").unwrap(), "/b/b/b");
    }

    #[test]
    fn escaped_slashes_in_fields() {
        assert_eq!(
            transform("/fhir/Patient", r"s/\/fhir/\/r4\/fhir/").unwrap(),
            "/r4/fhir/Patient"
        );
    }

    #[test]
    fn from_is_a_regex() {
        assert_eq!(transform("/v12/x", "s/v[0-9]+/v1/").unwrap(), "/v1/x");
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(PathTransform::parse("CSD/ihris").is_err());
        assert!(PathTransform::parse("s/only-from").is_err());
        assert!(PathTransform::parse("s/a/b/c/d").is_err());
    }

    #[test]
    fn invert_swaps_and_keeps_flags() {
        assert_eq!(invert("s/CSD/ihris/").unwrap(), "s/ihris/CSD/");
        assert_eq!(invert("s/a/b/g").unwrap(), "s/b/a/g");
        assert_eq!(invert("s/a/b").unwrap(), "s/b/a");
    }

    #[test]
    fn invert_handles_empty_to() {
        assert_eq!(invert("s/prefix//").unwrap(), "s//prefix/");
    }

    #[test]
    fn invert_preserves_escaped_slashes() {
        assert_eq!(invert(r"s/\/csd/\/ihris/").unwrap(), r"s/\/ihris/\/csd/");
    }

    // transform(transform(x, e), invert(e)) == x for literal, non-global e.
    #[test]
    fn round_trip_law_for_literal_substitutions() {
        let e = "s/CSD/ihris/";
        let once = transform("/CSD/patient", e).unwrap();
        assert_eq!(once, "/ihris/patient");
        let back = transform(&once, &invert(e).unwrap()).unwrap();
        assert_eq!(back, "/CSD/patient");
    }
}
