//! Device descriptor parsing.
//!
//! Coarse classification only: device class, browser family, OS family.
//! Anything finer-grained would start to look like fingerprinting.

use pagetailor_core_types::{DeviceSnapshot, DeviceType, Viewport};

/// Viewports narrower than this count as mobile when the UA says nothing.
const MOBILE_WIDTH_CEILING: u32 = 768;

pub fn snapshot_from_user_agent(user_agent: &str, viewport: Viewport) -> DeviceSnapshot {
    let ua = user_agent.to_ascii_lowercase();
    DeviceSnapshot {
        device_type: device_type(&ua, viewport),
        browser: browser_family(&ua).to_string(),
        os: os_family(&ua).to_string(),
        user_agent: user_agent.to_string(),
        viewport,
    }
}

fn device_type(ua: &str, viewport: Viewport) -> DeviceType {
    if ua.contains("ipad") || ua.contains("tablet") {
        return DeviceType::Tablet;
    }
    if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        return DeviceType::Mobile;
    }
    if viewport.width > 0 && viewport.width < MOBILE_WIDTH_CEILING {
        return DeviceType::Mobile;
    }
    DeviceType::Desktop
}

fn browser_family(ua: &str) -> &'static str {
    // Order matters: Chrome-derived UAs also claim Safari.
    if ua.contains("edg/") || ua.contains("edge/") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox/") {
        "Firefox"
    } else if ua.contains("chrome/") || ua.contains("crios/") {
        "Chrome"
    } else if ua.contains("safari/") {
        "Safari"
    } else {
        "Unknown"
    }
}

fn os_family(ua: &str) -> &'static str {
    if ua.contains("windows") {
        "Windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "iOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("mac os") || ua.contains("macos") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESKTOP_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
    const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) \
                                 AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 \
                                 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_desktop_chrome() {
        let snap = snapshot_from_user_agent(DESKTOP_CHROME, Viewport::new(1920, 1080));
        assert_eq!(snap.device_type, DeviceType::Desktop);
        assert_eq!(snap.browser, "Chrome");
        assert_eq!(snap.os, "Windows");
    }

    #[test]
    fn test_iphone_safari() {
        let snap = snapshot_from_user_agent(IPHONE_SAFARI, Viewport::new(390, 844));
        assert_eq!(snap.device_type, DeviceType::Mobile);
        assert_eq!(snap.browser, "Safari");
        assert_eq!(snap.os, "iOS");
    }

    #[test]
    fn test_narrow_viewport_counts_as_mobile() {
        let snap = snapshot_from_user_agent("SomeBot/1.0", Viewport::new(402, 720));
        assert_eq!(snap.device_type, DeviceType::Mobile);
    }
}
