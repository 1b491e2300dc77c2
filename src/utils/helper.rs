use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

pub fn normalize_tool_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Seconds since the Unix epoch, as carried by execution records.
pub fn unix_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Matches `$<id>` upstream-output references embedded in input strings.
pub fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(\d+)").unwrap())
}

/// Parses a string that is, in its entirety, a single `$<id>` reference.
pub fn whole_reference(s: &str) -> Option<usize> {
    let rest = s.strip_prefix('$')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tool_name() {
        assert_eq!(normalize_tool_name("Get Weather"), "get_weather");
        assert_eq!(normalize_tool_name("  finance_lookup "), "finance_lookup");
    }

    #[test]
    fn test_whole_reference() {
        assert_eq!(whole_reference("$0"), Some(0));
        assert_eq!(whole_reference("$12"), Some(12));
        assert_eq!(whole_reference("$"), None);
        assert_eq!(whole_reference("$1a"), None);
        assert_eq!(whole_reference("see $1"), None);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("somewhat longer", 8), "somewhat…");
    }
}
