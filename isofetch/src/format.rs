//! Human-readable sizes and durations for progress payloads and the CLI.

/// Format a byte count with a 1024 base, e.g. `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a transfer rate, e.g. `2.0 MB/s`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}

/// Format seconds as `45s`, `3m 20s` or `2h 5m`.
pub fn format_duration(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.0 B");
        assert_eq!(format_bytes(1023), "1023.0 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536 * 1024), "1.5 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 * 1024 * 1024), "5120.0 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(2.0 * 1024.0 * 1024.0), "2.0 MB/s");
        assert_eq!(format_speed(-1.0), "0.0 B/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(200), "3m 20s");
        assert_eq!(format_duration(7500), "2h 5m");
    }

    proptest! {
        #[test]
        fn prop_format_bytes_has_known_unit(bytes in any::<u64>()) {
            let text = format_bytes(bytes);
            let has_known_unit = ["B", "KB", "MB", "GB", "TB"].iter().any(|u| text.ends_with(&format!(" {}", u)));
            prop_assert!(has_known_unit);
        }
    }
}
