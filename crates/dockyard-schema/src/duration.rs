use crate::suite::SuiteError;
use std::time::Duration;

/// Parse a compact duration such as `500ms`, `30s`, `5m`, `1h30m` or `7d`.
///
/// Components must appear with a unit each; a bare number is rejected so that
/// `--older-than=30` is not silently read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, SuiteError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SuiteError::InvalidDuration(input.to_owned()));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(SuiteError::InvalidDuration(input.to_owned()));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| SuiteError::InvalidDuration(input.to_owned()))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 60 * 60),
            "d" => Duration::from_secs(value * 60 * 60 * 24),
            _ => return Err(SuiteError::InvalidDuration(input.to_owned())),
        };
        total += part;
    }
    Ok(total)
}

/// Render a duration in the same compact notation, largest units first.
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    let millis = d.subsec_millis();
    if secs == 0 {
        return format!("{millis}ms");
    }
    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m500ms").unwrap(), Duration::from_millis(60_500));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "30", "m", "5x", "1h-2m", "h1"] {
            assert!(parse_duration(bad).is_err(), "'{bad}' should be rejected");
        }
    }

    #[test]
    fn format_is_compact() {
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_millis(40)), "40ms");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "1d1h1m1s");
    }
}
