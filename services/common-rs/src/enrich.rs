//! Deterministic derivations from request metadata.
//!
//! The click-id is the single deduplication anchor on the write path: retries
//! and duplicate queue deliveries of the same request collapse onto one row.
//! The hash input format is `link_id|ts_millis|unique_part` and must stay
//! stable across services.

use sha2::{Digest, Sha256};

pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Deterministic click identifier.
pub fn click_id(link_id: &str, ts_millis: i64, unique_part: &str) -> String {
    sha256_hex(&format!("{link_id}|{ts_millis}|{unique_part}"))
}

/// Per-request uniqueness component of the click-id.
///
/// Prefers the edge-provided request identifier; otherwise the first 16 hex
/// chars of the user-agent hash, so identical requests within the same
/// millisecond still collapse rather than double-count.
pub fn unique_part(request_id: Option<&str>, user_agent: &str) -> String {
    match request_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => sha256_hex(user_agent)[..16].to_string(),
    }
}

/// One-way hash of the client IP. The raw IP never leaves the request scope.
pub fn ip_hash(ip: &str) -> String {
    sha256_hex(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_id_is_deterministic() {
        let a = click_id("lnk_1", 1_767_225_600_000, "req-42");
        let b = click_id("lnk_1", 1_767_225_600_000, "req-42");
        assert_eq!(a, b);
    }

    #[test]
    fn click_id_varies_with_each_input() {
        let base = click_id("lnk_1", 1_767_225_600_000, "req-42");
        assert_ne!(base, click_id("lnk_2", 1_767_225_600_000, "req-42"));
        assert_ne!(base, click_id("lnk_1", 1_767_225_600_001, "req-42"));
        assert_ne!(base, click_id("lnk_1", 1_767_225_600_000, "req-43"));
    }

    #[test]
    fn click_id_is_64_hex_chars() {
        let id = click_id("lnk_1", 0, "x");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unique_part_prefers_request_id() {
        assert_eq!(unique_part(Some("cf-ray-1"), "Mozilla/5.0"), "cf-ray-1");
    }

    #[test]
    fn unique_part_falls_back_to_ua_hash_prefix() {
        let part = unique_part(None, "Mozilla/5.0");
        assert_eq!(part.len(), 16);
        assert_eq!(part, sha256_hex("Mozilla/5.0")[..16]);
        // Empty request ids are treated as absent.
        assert_eq!(unique_part(Some(""), "Mozilla/5.0"), part);
    }

    #[test]
    fn ip_hash_is_fixed_length_hex() {
        let h = ip_hash("203.0.113.7");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h, ip_hash("203.0.113.8"));
    }
}
