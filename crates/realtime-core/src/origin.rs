//! Accepted-origin policy for incoming connections.

use std::collections::HashSet;

const WILDCARD: &str = "*";
const DEFAULT_PORT: &str = "80";

#[derive(Debug, Clone)]
pub enum OriginPolicy {
    Any,
    Patterns(HashSet<(String, String)>),
}

impl OriginPolicy {
    /// Parse the `origins` configuration option: a comma-separated list of
    /// `host:port` patterns, or `*:*` for "any".
    pub fn parse(spec: &str) -> Self {
        let mut patterns = HashSet::new();
        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if entry == "*:*" {
                return OriginPolicy::Any;
            }
            let (host, port) = entry.split_once(':').unwrap_or((entry, WILDCARD));
            patterns.insert((host.to_string(), port.to_string()));
        }
        if patterns.is_empty() {
            OriginPolicy::Any
        } else {
            OriginPolicy::Patterns(patterns)
        }
    }

    /// `origin_header` is the raw `Origin` header value, e.g.
    /// `https://app.example:443`. Missing host defaults port to 80.
    pub fn is_allowed(&self, origin_header: Option<&str>) -> bool {
        let patterns = match self {
            OriginPolicy::Any => return true,
            OriginPolicy::Patterns(p) => p,
        };

        let Some(origin) = origin_header else {
            return false;
        };

        let (host, port) = split_host_port(origin);

        patterns.contains(&(host.clone(), port.clone()))
            || patterns.contains(&(host, WILDCARD.to_string()))
            || patterns.contains(&(WILDCARD.to_string(), port))
    }
}

fn split_host_port(origin: &str) -> (String, String) {
    let without_scheme = origin.split("://").last().unwrap_or(origin);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (authority.to_string(), DEFAULT_PORT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_accepts_everything() {
        let policy = OriginPolicy::parse("*:*");
        assert!(policy.is_allowed(Some("https://anything:9999")));
        assert!(policy.is_allowed(None));
    }

    #[test]
    fn exact_host_port_match() {
        let policy = OriginPolicy::parse("app.example:443");
        assert!(policy.is_allowed(Some("https://app.example:443")));
        assert!(!policy.is_allowed(Some("https://app.example:8080")));
    }

    #[test]
    fn host_wildcard_port_matches_any_port() {
        let policy = OriginPolicy::parse("app.example:*");
        assert!(policy.is_allowed(Some("https://app.example:443")));
        assert!(policy.is_allowed(Some("https://app.example")));
        assert!(!policy.is_allowed(Some("https://evil.example:443")));
    }

    #[test]
    fn port_wildcard_matches_any_host() {
        let policy = OriginPolicy::parse("*:8080");
        assert!(policy.is_allowed(Some("https://any.host:8080")));
        assert!(!policy.is_allowed(Some("https://any.host:443")));
    }

    #[test]
    fn missing_origin_is_rejected_by_restrictive_policy() {
        let policy = OriginPolicy::parse("app.example:443");
        assert!(!policy.is_allowed(None));
    }

    #[test]
    fn default_port_is_80_when_origin_omits_it() {
        let policy = OriginPolicy::parse("app.example:80");
        assert!(policy.is_allowed(Some("http://app.example")));
    }
}
