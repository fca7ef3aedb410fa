//! Content equivalence checks for probe round-trips.

use serde_json::Value;

/// True when `served` is equivalent to `expected` for the given content type.
///
/// Exact bytes always match. Otherwise JSON bodies compare as parsed values
/// (servers may re-encode whitespace) and text bodies compare after
/// normalizing line endings and trailing whitespace.
pub fn content_matches(expected: &[u8], served: &[u8], content_type: &str) -> bool {
    if expected == served {
        return true;
    }
    let media = media_type(content_type);
    if media == "application/json" || media.ends_with("+json") {
        return match (
            serde_json::from_slice::<Value>(expected),
            serde_json::from_slice::<Value>(served),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
    }
    if media.starts_with("text/") {
        return match (std::str::from_utf8(expected), std::str::from_utf8(served)) {
            (Ok(a), Ok(b)) => normalize_text(a) == normalize_text(b),
            _ => false,
        };
    }
    false
}

/// True when a shared file body carries `section` (after text normalization).
pub fn contains_section(section: &[u8], served: &[u8]) -> bool {
    match (std::str::from_utf8(section), std::str::from_utf8(served)) {
        (Ok(section), Ok(served)) => {
            let section = normalize_text(section);
            !section.is_empty() && normalize_text(served).contains(&section)
        }
        _ => false,
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim_end().to_string()
}
