use crate::models::router::RouteConfig;
use ahash::HashMap as AHashMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while compiling route patterns.
#[derive(Error, Debug)]
pub enum RouteMatchError {
    /// The route pattern contains invalid syntax or unsupported constructs.
    #[error("Invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    /// The generated regex failed to compile; indicates a bug in pattern
    /// conversion rather than a user error.
    #[error("Regex compilation failed: {0}")]
    RegexError(String),
}

/// A matched route together with the parameters captured from the path.
///
/// Lives for a single request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteConfig>,
    pub params: HashMap<String, String>,
}

/// A route pattern compiled to an anchored regular expression.
#[derive(Debug, Clone)]
struct CompiledRoute {
    route: Arc<RouteConfig>,
    regex: Arc<Regex>,
}

/// Two-tier route table.
///
/// Routes whose pattern carries no `:name` parameter and no `*` wildcard
/// live in an exact-match hash map probed first. Everything else compiles
/// to a regex and is tried in declaration order, so earlier routes win
/// among overlapping patterns. Matching is case-sensitive.
///
/// All fields are immutable after construction; the matcher is shared
/// freely across workers.
#[derive(Debug, Default)]
pub struct RouteMatcher {
    static_routes: AHashMap<String, Arc<RouteConfig>>,
    patterns: Vec<CompiledRoute>,
}

impl RouteMatcher {
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self, RouteMatchError> {
        let mut static_routes = AHashMap::default();
        let mut patterns = Vec::new();

        for route in routes {
            let route = Arc::new(route);
            if Self::is_static(&route.path) {
                static_routes.insert(route.path.clone(), route);
            } else {
                let pattern = Self::pattern_to_regex(&route.path)?;
                let regex = Regex::new(&pattern)
                    .map_err(|e| RouteMatchError::RegexError(e.to_string()))?;
                patterns.push(CompiledRoute {
                    route,
                    regex: Arc::new(regex),
                });
            }
        }

        Ok(Self {
            static_routes,
            patterns,
        })
    }

    /// Resolves `(method, path)` to a route and its captured parameters.
    ///
    /// The exact map is probed first. An exact hit whose method set rejects
    /// the request does not end the search; the pattern list may still
    /// produce a match for the same path under a different route.
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch> {
        if let Some(route) = self.static_routes.get(path) {
            if route.allows_method(method) {
                return Some(RouteMatch {
                    route: route.clone(),
                    params: HashMap::new(),
                });
            }
        }

        for compiled in &self.patterns {
            if !compiled.route.allows_method(method) {
                continue;
            }
            if let Some(captures) = compiled.regex.captures(path) {
                let mut params = HashMap::new();
                for name in compiled.regex.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        params.insert(name.to_string(), value.as_str().to_string());
                    }
                }
                return Some(RouteMatch {
                    route: compiled.route.clone(),
                    params,
                });
            }
        }

        None
    }

    /// Union of methods allowed on `path` across every matching route.
    ///
    /// A matching route with an empty method set allows everything, so the
    /// full standard set is returned.
    pub fn allowed_methods(&self, path: &str) -> HashSet<String> {
        const ALL: &[&str] = &[
            "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
        ];

        let mut methods = HashSet::new();
        let mut collect = |route: &RouteConfig| {
            if route.methods.is_empty() {
                methods.extend(ALL.iter().map(|m| m.to_string()));
            } else {
                methods.extend(route.methods.iter().cloned());
            }
        };

        if let Some(route) = self.static_routes.get(path) {
            collect(route);
        }
        for compiled in &self.patterns {
            if compiled.regex.is_match(path) {
                collect(&compiled.route);
            }
        }

        methods
    }

    /// A pattern without parameters or wildcards is an exact path.
    fn is_static(pattern: &str) -> bool {
        !pattern.contains('*') && !pattern.contains(':')
    }

    /// Converts a route pattern to an anchored regex.
    ///
    /// `:name` becomes a named single-segment capture, `*` becomes `.*`
    /// (so a trailing `/*` requires at least a slash plus anything after
    /// the prefix). The regex is anchored with `^`, and with `$` unless it
    /// ends in `.*`.
    fn pattern_to_regex(pattern: &str) -> Result<String, RouteMatchError> {
        let mut regex = String::with_capacity(pattern.len() * 2);
        regex.push('^');

        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                ':' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(RouteMatchError::InvalidPattern {
                            pattern: pattern.to_string(),
                        });
                    }
                    regex.push_str(&format!("(?P<{}>[^/]+)", name));
                }
                '*' => regex.push_str(".*"),
                // Escape regex metacharacters
                '.' | '?' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' | '{'
                | '}' => {
                    regex.push('\\');
                    regex.push(ch);
                }
                _ => regex.push(ch),
            }
        }

        if !regex.ends_with(".*") {
            regex.push('$');
        }

        Ok(regex)
    }
}
