//! Duration strings used in config files: "250ms", "1s", "5m", or a bare
//! number of seconds.

use std::time::Duration;

use crate::error::ConfigError;

/// Parse a duration string.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let trimmed = s.trim();
    let parsed = if let Some(secs) = trimmed.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<f64>().ok().and_then(secs_f64)
        }
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        trimmed.parse::<f64>().ok().and_then(secs_f64)
    };

    parsed.ok_or_else(|| ConfigError::Duration(s.to_string()))
}

fn secs_f64(v: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(v).ok()
}

/// Render a duration in the shortest form [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seconds() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn parse_milliseconds() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn parse_minutes() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(
            parse_duration("400000000000000000m"),
            Err(ConfigError::Duration("400000000000000000m".to_string()))
        );
    }

    #[test]
    fn parse_plain_number_as_seconds() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(
            parse_duration("soon"),
            Err(ConfigError::Duration("soon".to_string()))
        );
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn format_picks_shortest_unit() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_millis(100)), "100ms");
    }
}
