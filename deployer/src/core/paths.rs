//! Public path validation and mapping to relative filesystem paths.

use std::path::PathBuf;

/// Check that `path` is a clean absolute URL path the engine may own.
///
/// Rejects relative paths, `..`/`.` segments, empty segments, query strings,
/// fragments, backslashes, and control characters.
pub fn validate_public_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("path '{path}' must start with '/'"));
    }
    if path == "/" {
        return Err("path '/' cannot be an endpoint".to_string());
    }
    if path.contains(['?', '#', '\\']) {
        return Err(format!(
            "path '{path}' must not contain query, fragment, or backslash"
        ));
    }
    if path.chars().any(char::is_control) {
        return Err(format!("path '{path}' contains control characters"));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(format!("path '{path}' contains an empty segment")),
            "." | ".." => return Err(format!("path '{path}' contains a relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Relative filesystem path for a validated public path (`/a/b.json` → `a/b.json`).
pub fn relative_fs_path(path: &str) -> Result<PathBuf, String> {
    validate_public_path(path)?;
    Ok(path[1..].split('/').collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_known_paths() {
        assert!(validate_public_path("/.well-known/ai-plugin.json").is_ok());
        assert!(validate_public_path("/robots.txt").is_ok());
    }

    #[test]
    fn rejects_traversal_and_queries() {
        for bad in [
            "relative.json",
            "/",
            "/a/../b",
            "/a//b",
            "/a/./b",
            "/a?b=1",
            "/a#frag",
            "/a\\b",
            "/trailing/",
        ] {
            assert!(validate_public_path(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn relative_fs_path_strips_leading_slash() {
        let rel = relative_fs_path("/.well-known/ai.json").expect("path");
        assert_eq!(rel, PathBuf::from(".well-known").join("ai.json"));
    }
}
