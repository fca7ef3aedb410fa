//! Reversible slug transform for persistence keys.
//!
//! ASCII alphanumerics and `-` pass through. `/` → `_s`, `.` → `_d`,
//! `_` → `__`, anything else → `_x` + two lowercase hex digits per byte.

const STATE_KEY_PREFIX: &str = "strategy_state/";

/// Encode an endpoint path as a store-safe slug.
pub fn encode(path: &str) -> String {
    let mut out = String::with_capacity(path.len() * 2);
    for byte in path.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            b'/' => out.push_str("_s"),
            b'.' => out.push_str("_d"),
            b'_' => out.push_str("__"),
            other => out.push_str(&format!("_x{other:02x}")),
        }
    }
    out
}

/// Invert [`encode`].
pub fn decode(slug: &str) -> Result<String, String> {
    let bytes = slug.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte != b'_' {
            if !(byte.is_ascii_alphanumeric() || byte == b'-') {
                return Err(format!("invalid slug byte {:?} at {}", byte as char, i));
            }
            out.push(byte);
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b's') => out.push(b'/'),
            Some(b'd') => out.push(b'.'),
            Some(b'_') => out.push(b'_'),
            Some(b'x') => {
                let hex = slug
                    .get(i + 2..i + 4)
                    .ok_or_else(|| format!("truncated hex escape at {i}"))?;
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| format!("invalid hex escape '{hex}' at {i}"))?;
                out.push(value);
                i += 4;
                continue;
            }
            _ => return Err(format!("dangling escape at {i}")),
        }
        i += 2;
    }
    String::from_utf8(out).map_err(|err| format!("slug is not utf-8: {err}"))
}

/// Persistence key for an endpoint's strategy state.
pub fn state_key(path: &str) -> String {
    format!("{STATE_KEY_PREFIX}{}", encode(path))
}

/// Endpoint path for a persistence key produced by [`state_key`].
pub fn path_from_state_key(key: &str) -> Option<String> {
    key.strip_prefix(STATE_KEY_PREFIX)
        .and_then(|slug| decode(slug).ok())
}
