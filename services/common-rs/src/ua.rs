//! User-agent classification: device class and the crawler heuristic.
//!
//! Both are fixed-token, case-insensitive substring scans. Tablet tokens are
//! checked before mobile tokens because tablet user-agents often also carry
//! "Mobile".

use crate::enums::DeviceClass;

const TABLET_TOKENS: &[&str] = &["ipad", "tablet", "kindle", "silk", "playbook"];

const MOBILE_TOKENS: &[&str] = &[
    "mobile",
    "iphone",
    "ipod",
    "android",
    "blackberry",
    "windows phone",
    "opera mini",
    "webos",
];

const DESKTOP_TOKENS: &[&str] = &["windows nt", "macintosh", "mac os x", "x11", "cros", "linux"];

const BOT_TOKENS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "crawling",
    "slurp",
    "facebookexternalhit",
    "whatsapp",
    "telegram",
    "preview",
    "headless",
    "lighthouse",
    "python-requests",
    "python/",
    "curl/",
    "wget/",
    "go-http-client",
    "okhttp",
    "scrapy",
    "phantomjs",
    "pingdom",
    "uptimerobot",
    "monitoring",
    "scanner",
    "archive.org",
];

pub fn device_class(user_agent: &str) -> DeviceClass {
    let ua = user_agent.to_lowercase();
    if TABLET_TOKENS.iter().any(|t| ua.contains(t)) {
        DeviceClass::Tablet
    } else if MOBILE_TOKENS.iter().any(|t| ua.contains(t)) {
        DeviceClass::Mobile
    } else if DESKTOP_TOKENS.iter().any(|t| ua.contains(t)) {
        DeviceClass::Desktop
    } else {
        DeviceClass::Unknown
    }
}

/// Crawler/scraper heuristic. Flagged requests never reach the counter or
/// the queue.
pub fn is_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    BOT_TOKENS.iter().any(|t| ua.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tablet_wins_over_mobile_tokens() {
        // iPad Safari carries "Mobile" — the tablet check must run first.
        let ipad = "Mozilla/5.0 (iPad; CPU OS 16_5 like Mac OS X) AppleWebKit/605.1.15 \
                    (KHTML, like Gecko) Version/16.5 Mobile/15E148 Safari/604.1";
        assert_eq!(device_class(ipad), DeviceClass::Tablet);
    }

    #[test]
    fn classifies_common_agents() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                      AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148";
        let chrome = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                      (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
        let mac = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
        assert_eq!(device_class(iphone), DeviceClass::Mobile);
        assert_eq!(device_class(chrome), DeviceClass::Desktop);
        assert_eq!(device_class(mac), DeviceClass::Desktop);
        assert_eq!(device_class(""), DeviceClass::Unknown);
        assert_eq!(device_class("SomeExoticClient/1.0"), DeviceClass::Unknown);
    }

    #[test]
    fn flags_known_crawlers() {
        assert!(is_bot("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"));
        assert!(is_bot("Mozilla/5.0 (compatible; bingbot/2.0)"));
        assert!(is_bot("facebookexternalhit/1.1"));
        assert!(is_bot("curl/8.4.0"));
        assert!(is_bot("python-requests/2.31.0"));
    }

    #[test]
    fn real_browsers_are_not_flagged() {
        assert!(!is_bot(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0"
        ));
        assert!(!is_bot(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148"
        ));
        assert!(!is_bot(""));
    }
}
