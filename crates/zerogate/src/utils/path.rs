use crate::models::router::RouteConfig;
use std::collections::HashMap;

/// The static prefix of a route pattern: everything before the first `*`
/// wildcard or `:name` parameter.
pub fn static_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(|c| c == '*' || c == ':')
        .unwrap_or(pattern.len());
    &pattern[..end]
}

/// Computes the upstream path for a matched request.
///
/// Ordered operations:
/// 1. `strip_prefix` trims the pattern's static prefix (sans trailing
///    slash) from the inbound path.
/// 2. `add_prefix` is prepended with exactly one `/` separating it from
///    the remainder.
/// 3. Captured parameters replace literal `:name` occurrences.
/// 4. The result always starts with `/`.
///
/// Pure function of its inputs; the same request always rewrites to the
/// same path.
pub fn rewrite(path: &str, route: &RouteConfig, params: &HashMap<String, String>) -> String {
    let mut result = path.to_string();

    if route.strip_prefix {
        let prefix = static_prefix(&route.path).trim_end_matches('/');
        if !prefix.is_empty() {
            if let Some(rest) = result.strip_prefix(prefix) {
                result = rest.to_string();
            }
        }
    }

    if !route.add_prefix.is_empty() {
        let prefix = route.add_prefix.trim_end_matches('/');
        let rest = result.trim_start_matches('/');
        result = format!("{}/{}", prefix, rest);
    }

    for (name, value) in params {
        let placeholder = format!(":{}", name);
        if result.contains(placeholder.as_str()) {
            result = result.replace(placeholder.as_str(), value);
        }
    }

    if !result.starts_with('/') {
        result.insert(0, '/');
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::router::BackendConfig;

    fn route(path: &str, strip: bool, add: &str) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            methods: Vec::new(),
            backends: vec![BackendConfig {
                ziti_service: "svc".to_string(),
                port: 0,
                identity_file: Some("/id.json".to_string()),
                weight: 1,
                priority: 0,
                timeout: None,
                max_retries: None,
            }],
            load_balancing: None,
            health_check: None,
            retry: None,
            circuit_breaker: None,
            strip_prefix: strip,
            add_prefix: add.to_string(),
            rewrite_host: false,
            timeout: None,
            auth: None,
        }
    }

    #[test]
    fn static_prefix_stops_at_tokens() {
        assert_eq!(static_prefix("/api/*"), "/api/");
        assert_eq!(static_prefix("/users/:id"), "/users/");
        assert_eq!(static_prefix("/plain"), "/plain");
    }

    #[test]
    fn passthrough_without_prefix_options() {
        let r = route("/api/*", false, "");
        let params = HashMap::new();
        assert_eq!(rewrite("/api/users", &r, &params), "/api/users");
    }

    #[test]
    fn strip_then_add_prefix() {
        let r = route("/external/api/*", true, "/internal");
        let params = HashMap::new();
        assert_eq!(rewrite("/external/api/users", &r, &params), "/internal/users");
    }

    #[test]
    fn strip_only_yields_remainder_with_leading_slash() {
        let r = route("/external/api/*", true, "");
        let params = HashMap::new();
        assert_eq!(rewrite("/external/api/users", &r, &params), "/users");
    }

    #[test]
    fn parameter_substitution_in_added_prefix() {
        let r = route("/tenants/:tenant/*", true, "/v2/:tenant");
        let mut params = HashMap::new();
        params.insert("tenant".to_string(), "acme".to_string());
        // pattern static prefix is "/tenants/", remainder keeps the captured
        // segment which the prefix template reuses
        let rewritten = rewrite("/tenants/acme/users", &r, &params);
        assert_eq!(rewritten, "/v2/acme/acme/users");
    }

    #[test]
    fn rewrite_is_idempotent_without_prefixes() {
        let r = route("/a/*", false, "");
        let params = HashMap::new();
        let once = rewrite("/a/b", &r, &params);
        let twice = rewrite(&once, &r, &params);
        assert_eq!(once, twice);
    }

    #[test]
    fn result_always_starts_with_slash() {
        let r = route("/api/*", true, "");
        let params = HashMap::new();
        // stripping the whole prefix of "/api/x" leaves "/x"; stripping a
        // path equal to the bare prefix leaves the root
        assert_eq!(rewrite("/api", &r, &params), "/");
    }
}
