use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([dhms])").expect("valid duration regex"));

/// Parses durations such as `1d`, `1h30m` or `45s`.
///
/// A bare number is read as seconds. Returns `None` when nothing could be parsed or the value
/// overflows.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total_seconds = 0u64;
    let mut found = false;

    for cap in DURATION_PART.captures_iter(s) {
        found = true;
        let value: u64 = cap[1].parse().ok()?;
        let unit = &cap[2];

        let seconds = match unit {
            "d" => value.checked_mul(24 * 3600)?,
            "h" => value.checked_mul(3600)?,
            "m" => value.checked_mul(60)?,
            "s" => value,
            _ => 0,
        };
        total_seconds = total_seconds.checked_add(seconds)?;
    }

    if found {
        Some(Duration::from_secs(total_seconds))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10m30s"), Some(Duration::from_secs(630)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("300"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("invalid"), None);
    }

    #[test]
    fn overflowing_values_are_rejected() {
        assert_eq!(parse_duration("99999999999999999999d"), None);
    }
}
