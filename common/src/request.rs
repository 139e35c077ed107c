use log::{info, warn};

use crate::profile::ButtonId;

/// Device identity sent to the server: each MAC byte as lower-case hex,
/// without zero padding or separators.
pub fn device_id(mac: &[u8; 6]) -> String {
    mac.iter().map(|byte| format!("{byte:x}")).collect()
}

/// Gauges occasionally report values outside 0..=100; clamp before sending.
pub fn normalize_battery_percent(raw: i32) -> u8 {
    if !(0..=100).contains(&raw) {
        warn!("battery percent is {raw}% which isn't plausible; normalizing it to 0% to 100%");
    }
    raw.clamp(0, 100) as u8
}

pub fn build_url(
    base_url: &str,
    device_id: &str,
    battery_percent: Option<i32>,
    button: Option<ButtonId>,
) -> String {
    let mut url = format!("{base_url}{device_id}");
    let mut separator = '?';

    if let Some(raw) = battery_percent {
        let battery = normalize_battery_percent(raw);
        url.push(separator);
        url.push_str(&format!("battery_percent={battery}"));
        separator = '&';
    }

    if let Some(button) = button {
        url.push(separator);
        url.push_str(&format!("button={button}"));
    }

    info!("request url: {url}");
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://frames.local/render/";

    #[test]
    fn device_id_is_unpadded_lower_hex() {
        assert_eq!(device_id(&[0x7C, 0xDF, 0xA1, 0x0B, 0x00, 0xE4]), "7cdfa1b0e4");
    }

    #[test]
    fn clamps_implausible_battery_readings() {
        assert_eq!(normalize_battery_percent(137), 100);
        assert_eq!(normalize_battery_percent(-4), 0);
        assert_eq!(normalize_battery_percent(42), 42);
    }

    #[test]
    fn includes_only_known_parameters() {
        assert_eq!(build_url(BASE, "abc", None, None), format!("{BASE}abc"));
        assert_eq!(
            build_url(BASE, "abc", Some(137), None),
            format!("{BASE}abc?battery_percent=100")
        );
        assert_eq!(
            build_url(BASE, "abc", None, Some(ButtonId::new('B'))),
            format!("{BASE}abc?button=B")
        );
        assert_eq!(
            build_url(BASE, "abc", Some(-4), Some(ButtonId::new('A'))),
            format!("{BASE}abc?battery_percent=0&button=A")
        );
    }
}
