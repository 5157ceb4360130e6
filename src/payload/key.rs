//! Data-only request recognition and cache key derivation.
//!
//! A data-only request targets `<route>/_payload.json`, optionally followed by
//! a query string. The query never takes part in the key: `/a/b/_payload.json`
//! and `/a/b/_payload.json?x=1` share the entry of route `/a/b`.

use super::PAYLOAD_SUFFIX;

// Path part of a request target, up to the first `?`.
fn path_of(target: &str) -> &str {
    target.split_once('?').map_or(target, |(path, _)| path)
}

/// Returns `true` if `target` (path plus optional `?query`) addresses the
/// data-only representation of a page.
pub fn is_payload_request(target: &str) -> bool {
    path_of(target).ends_with(PAYLOAD_SUFFIX)
}

/// Canonical route path for a page request: query stripped, trailing slashes
/// stripped, root stays `/`.
///
/// # Examples
///
/// ```
/// use payload_gate::payload::normalize_route_path;
///
/// assert_eq!(normalize_route_path("/a/b/"), "/a/b");
/// assert_eq!(normalize_route_path("/a/b?tab=1"), "/a/b");
/// assert_eq!(normalize_route_path("/"), "/");
/// ```
pub fn normalize_route_path(target: &str) -> String {
    let trimmed = path_of(target).trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Route path of the page a data-only request belongs to, or `None` when
/// `target` is not a data-only request.
///
/// # Examples
///
/// ```
/// use payload_gate::payload::payload_route_path;
///
/// assert_eq!(payload_route_path("/a/b/_payload.json?x=1").as_deref(), Some("/a/b"));
/// assert_eq!(payload_route_path("/_payload.json").as_deref(), Some("/"));
/// assert_eq!(payload_route_path("/a/b"), None);
/// ```
pub fn payload_route_path(target: &str) -> Option<String> {
    let parent = path_of(target).strip_suffix(PAYLOAD_SUFFIX)?;
    Some(normalize_route_path(parent))
}

/// Store key for `route_path` under deployment `build_id`.
pub fn cache_key(build_id: &str, route_path: &str) -> String {
    format!("{build_id}:{route_path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_payload_targets() {
        assert!(is_payload_request("/_payload.json"));
        assert!(is_payload_request("/pkg/vue/_payload.json"));
        assert!(is_payload_request("/pkg/vue/_payload.json?v=3"));
        assert!(!is_payload_request("/pkg/vue"));
        assert!(!is_payload_request("/pkg/vue?file=/_payload.json"));
        assert!(!is_payload_request("/pkg/_payload.json.bak"));
        assert!(!is_payload_request("/_payload.jsonx"));
    }

    #[test]
    fn query_does_not_change_route() {
        assert_eq!(
            payload_route_path("/a/b/_payload.json?x=1"),
            payload_route_path("/a/b/_payload.json")
        );
    }

    #[test]
    fn root_payload_maps_to_root() {
        assert_eq!(payload_route_path("/_payload.json").as_deref(), Some("/"));
        assert_eq!(payload_route_path("/_payload.json?x").as_deref(), Some("/"));
    }

    #[test]
    fn html_and_payload_paths_agree() {
        let from_html = normalize_route_path("/a/b/");
        assert_eq!(from_html, normalize_route_path("/a/b"));
        assert_eq!(Some(from_html), payload_route_path("/a/b/_payload.json"));
        assert_eq!(normalize_route_path("/"), "/");
        assert_eq!(normalize_route_path("/?q=1"), "/");
    }

    #[test]
    fn key_combines_build_and_route() {
        assert_eq!(cache_key("B1", "/pkg/vue"), "B1:/pkg/vue");
        assert_ne!(cache_key("B1", "/"), cache_key("B2", "/"));
    }
}
