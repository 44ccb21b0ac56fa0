//! Provides formatting helpers for durations and byte sizes used when reporting statistics.
use std::fmt::Write;
use std::time::Duration;

/// Formats a duration given in microseconds.
///
/// This picks the unit (microseconds, milliseconds or seconds) which yields the most concise
/// representation. See [format_short_duration] for examples.
pub fn format_micros(micros: i32, f: &mut dyn Write) -> std::fmt::Result {
    let (value, unit) = match micros {
        m if m < 1_000 => return write!(f, "{} us", m),
        m if m < 1_000_000 => (m as f32 / 1_000., "ms"),
        m => (m as f32 / 1_000_000., "s"),
    };

    write_scaled(value, unit, f)
}

fn write_scaled(value: f32, unit: &str, f: &mut dyn Write) -> std::fmt::Result {
    if value < 10. {
        write!(f, "{:.2} {}", value, unit)
    } else if value < 100. {
        write!(f, "{:.1} {}", value, unit)
    } else {
        write!(f, "{:.0} {}", value.trunc(), unit)
    }
}

/// Formats a duration given in microseconds and returns a String representation.
///
/// # Examples
///
/// ```
/// assert_eq!(lookaside::fmt::format_short_duration(100), "100 us");
/// assert_eq!(lookaside::fmt::format_short_duration(8_192), "8.19 ms");
/// assert_eq!(lookaside::fmt::format_short_duration(32_768), "32.8 ms");
/// assert_eq!(lookaside::fmt::format_short_duration(128_123), "128 ms");
/// assert_eq!(lookaside::fmt::format_short_duration(1_128_123), "1.13 s");
/// assert_eq!(lookaside::fmt::format_short_duration(101_000_000), "101 s");
/// ```
pub fn format_short_duration(duration_in_micros: i32) -> String {
    let mut result = String::new();
    let _ = format_micros(duration_in_micros, &mut result);
    result
}

const SIZE_UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a given size in bytes.
///
/// See [format_size] for examples.
pub fn format_bytes(size_in_bytes: usize, f: &mut dyn Write) -> std::fmt::Result {
    match size_in_bytes {
        1 => return write!(f, "1 byte"),
        n if n < 1024 => return write!(f, "{} bytes", n),
        _ => (),
    }

    let mut size = size_in_bytes as f32 / 1024.;
    let mut unit = 0;
    while size > 1024. && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size <= 10. {
        write!(f, "{:.2} {}", size, SIZE_UNITS[unit])
    } else if size <= 100. {
        write!(f, "{:.1} {}", size, SIZE_UNITS[unit])
    } else {
        write!(f, "{:.0} {}", size, SIZE_UNITS[unit])
    }
}

/// Formats a given size in bytes and returns a String representation.
///
/// # Examples
///
/// ```
/// assert_eq!(lookaside::fmt::format_size(0), "0 bytes");
/// assert_eq!(lookaside::fmt::format_size(1), "1 byte");
/// assert_eq!(lookaside::fmt::format_size(8_734), "8.53 KiB");
/// assert_eq!(lookaside::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(lookaside::fmt::format_size(8_734_000), "8.33 MiB");
/// assert_eq!(lookaside::fmt::format_size(87_340_000_000), "81.3 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    let mut result = String::new();
    let _ = format_bytes(size_in_bytes, &mut result);
    result
}

const DURATION_UNITS: [(u128, &str); 5] = [
    (24 * 60 * 60 * 1000, "d"),
    (60 * 60 * 1000, "h"),
    (60 * 1000, "m"),
    (1000, "s"),
    (1, "ms"),
];

/// Formats a duration in a human readable manner like "1m 2s 13ms".
///
/// Components which are zero are omitted. Durations below one millisecond yield "0ms".
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(lookaside::fmt::format_duration(Duration::from_millis(0)), "0ms");
/// assert_eq!(lookaside::fmt::format_duration(Duration::from_millis(2)), "2ms");
/// assert_eq!(lookaside::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(lookaside::fmt::format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(lookaside::fmt::format_duration(Duration::from_secs(25 * 60 * 60 + 59)), "1d 1h 59s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let mut result = String::new();
    let mut remainder = duration.as_millis();

    for (millis, unit) in DURATION_UNITS {
        let amount = remainder / millis;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            remainder %= millis;
        }
    }

    if result.is_empty() {
        result.push_str("0ms");
    }

    result
}
