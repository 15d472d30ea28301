//! Referrer normalization, applied at aggregation time.

use url::Url;

pub const DIRECT: &str = "(direct)";

/// Collapse a raw Referer header into a rollup dimension value.
///
/// Missing or empty → `"(direct)"`; a parseable URL → its host with a leading
/// `www.` stripped; anything malformed → the first 100 characters verbatim.
pub fn normalize_referrer(referrer: Option<&str>) -> String {
    let raw = match referrer {
        Some(r) if !r.trim().is_empty() => r.trim(),
        _ => return DIRECT.to_string(),
    };
    match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) => host.strip_prefix("www.").unwrap_or(host).to_string(),
            None => truncate_chars(raw, 100),
        },
        Err(_) => truncate_chars(raw, 100),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_empty_is_direct() {
        assert_eq!(normalize_referrer(None), DIRECT);
        assert_eq!(normalize_referrer(Some("")), DIRECT);
        assert_eq!(normalize_referrer(Some("   ")), DIRECT);
    }

    #[test]
    fn strips_leading_www() {
        assert_eq!(
            normalize_referrer(Some("https://www.example.com/page?q=1")),
            "example.com"
        );
        assert_eq!(normalize_referrer(Some("https://example.com/")), "example.com");
        // Only a leading www. label is stripped.
        assert_eq!(normalize_referrer(Some("https://wwwexample.com/")), "wwwexample.com");
    }

    #[test]
    fn malformed_referrer_is_kept_verbatim_up_to_100_chars() {
        assert_eq!(normalize_referrer(Some("not a url")), "not a url");
        let long = "x".repeat(250);
        assert_eq!(normalize_referrer(Some(&long)).len(), 100);
    }

    #[test]
    fn subdomains_are_preserved() {
        assert_eq!(
            normalize_referrer(Some("https://news.ycombinator.com/item?id=1")),
            "news.ycombinator.com"
        );
    }
}
