//! Route matching.
//!
//! Plugin routes live under `/plugins/<plugin_id><route.path>`. Matching is
//! first-match-wins over the manifest's declared order, so exact routes
//! declared before wildcards take precedence.

use osaurus_core::PluginId;
use osaurus_plugins::RouteSpec;

/// Split a request path into `(plugin_id, subpath)`.
///
/// `/plugins/com.example.weather/callback` becomes
/// `(com.example.weather, "/callback")`; a bare `/plugins/<id>` yields an
/// empty subpath. Returns `None` outside the plugin namespace or for an
/// invalid id.
#[must_use]
pub fn split_plugin_path(path: &str) -> Option<(PluginId, String)> {
    let rest = path.strip_prefix("/plugins/")?;
    let (id_part, subpath) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, ""),
    };
    let plugin_id = PluginId::new(id_part).ok()?;
    Some((plugin_id, subpath.to_string()))
}

/// Find the first declared route matching `(method, subpath)`.
///
/// Methods compare case-insensitively. A path ending in `/*` matches the
/// bare prefix and anything under `prefix/`; all other paths require exact
/// equality.
#[must_use]
pub fn match_route<'a>(
    routes: &'a [RouteSpec],
    method: &str,
    subpath: &str,
) -> Option<&'a RouteSpec> {
    let method = method.to_uppercase();
    let subpath = if subpath.starts_with('/') {
        subpath.to_string()
    } else {
        format!("/{subpath}")
    };

    routes.iter().find(|route| {
        let method_allowed = route
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&method));
        if !method_allowed {
            return false;
        }

        match route.path.strip_suffix("/*") {
            Some(prefix) => {
                subpath == prefix || subpath.starts_with(&format!("{prefix}/"))
            }
            None => subpath == route.path,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use osaurus_plugins::RouteAuth;

    fn route(id: &str, path: &str, methods: &[&str]) -> RouteSpec {
        RouteSpec {
            id: id.into(),
            path: path.into(),
            methods: methods.iter().map(ToString::to_string).collect(),
            auth: RouteAuth::Owner,
            description: None,
        }
    }

    #[test]
    fn test_exact_route_beats_wildcard_in_declaration_order() {
        let routes = vec![
            route("exact", "/api/health", &["GET"]),
            route("wildcard", "/api/*", &["GET"]),
        ];

        assert_eq!(match_route(&routes, "GET", "/api/health").unwrap().id, "exact");
        assert_eq!(match_route(&routes, "GET", "/api/other").unwrap().id, "wildcard");
    }

    #[test]
    fn test_methods_compare_case_insensitively() {
        let routes = vec![route("cb", "/callback", &["post"])];
        assert!(match_route(&routes, "POST", "/callback").is_some());
        assert!(match_route(&routes, "get", "/callback").is_none());
    }

    #[test]
    fn test_subpath_is_normalised_with_leading_slash() {
        let routes = vec![route("cb", "/callback", &["GET"])];
        assert!(match_route(&routes, "GET", "callback").is_some());
    }

    #[test]
    fn test_wildcard_matches_prefix_and_descendants() {
        let routes = vec![route("app", "/app/*", &["GET"])];
        assert!(match_route(&routes, "GET", "/app").is_some());
        assert!(match_route(&routes, "GET", "/app/index.html").is_some());
        assert!(match_route(&routes, "GET", "/app/deep/path").is_some());
        // "/application" shares the string prefix but not the path prefix.
        assert!(match_route(&routes, "GET", "/application").is_none());
    }

    #[test]
    fn test_no_match_returns_none() {
        let routes = vec![route("cb", "/callback", &["GET"])];
        assert!(match_route(&routes, "GET", "/other").is_none());
        assert!(match_route(&[], "GET", "/callback").is_none());
    }

    #[test]
    fn test_split_plugin_path() {
        let (id, subpath) = split_plugin_path("/plugins/com.example.weather/callback").unwrap();
        assert_eq!(id.as_str(), "com.example.weather");
        assert_eq!(subpath, "/callback");

        let (id, subpath) = split_plugin_path("/plugins/com.example.weather").unwrap();
        assert_eq!(id.as_str(), "com.example.weather");
        assert_eq!(subpath, "");

        assert!(split_plugin_path("/v1/models").is_none());
        assert!(split_plugin_path("/plugins/NOT-VALID/x").is_none());
    }
}
