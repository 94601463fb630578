//! typed, per-set view over the parsed configuration with
//! global-section fallback, defaulting, and multi-key (`NAME_01`, `NAME_02`)
//! aggregation. A free-standing accessor, not a class hierarchy.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use ini::Ini;
use std::time::Duration;

pub const GLOBAL_SECTION: &str = "Global";

/// A daily time-of-day range, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: chrono::NaiveTime,
    pub end: chrono::NaiveTime,
}

impl TimeRange {
    /// The default runtime window: no restriction at all.
    pub fn whole_day() -> TimeRange {
        TimeRange {
            start: chrono::NaiveTime::MIN,
            end: chrono::NaiveTime::from_hms_opt(23, 59, 59).expect("valid time"),
        }
    }

    pub fn contains(&self, t: chrono::NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t <= self.end
        } else {
            // wraps past midnight
            t >= self.start || t <= self.end
        }
    }
}

/// A read-only view over one backup set's section, falling back to
/// `[Global]`, falling back to a caller-supplied default.
pub struct ConfigView<'a> {
    ini: &'a Ini,
    section: String,
}

impl<'a> ConfigView<'a> {
    pub fn new(ini: &'a Ini, section: impl Into<String>) -> Self {
        ConfigView {
            ini,
            section: section.into(),
        }
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.ini
            .section(Some(self.section.as_str()))
            .and_then(|s| s.get(key))
            .or_else(|| {
                self.ini
                    .section(Some(GLOBAL_SECTION))
                    .and_then(|s| s.get(key))
            })
    }

    pub fn str_opt(&self, key: &str) -> Option<String> {
        self.raw(key).map(|s| s.to_string())
    }

    pub fn str(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    pub fn required_str(&self, key: &str) -> Result<String> {
        self.raw(key)
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("missing required key '{key}' in [{}]", self.section))
    }

    pub fn int(&self, key: &str, default: i64) -> Result<i64> {
        match self.raw(key) {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .with_context(|| format!("key '{key}' in [{}] is not an integer: {v:?}", self.section)),
            None => Ok(default),
        }
    }

    pub fn int_opt(&self, key: &str) -> Result<Option<i64>> {
        match self.raw(key) {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .map(Some)
                .with_context(|| format!("key '{key}' in [{}] is not an integer: {v:?}", self.section)),
            None => Ok(None),
        }
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(v) => matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        match self.raw(key) {
            Some(v) if !v.trim().is_empty() => {
                v.split(',').map(|s| s.trim().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn date(&self, key: &str) -> Result<Option<NaiveDate>> {
        match self.raw(key) {
            Some(v) => NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                .map(Some)
                .with_context(|| format!("key '{key}' in [{}] is not YYYY-MM-DD: {v:?}", self.section)),
            None => Ok(None),
        }
    }

    pub fn time_range(&self, key: &str, default: TimeRange) -> Result<TimeRange> {
        match self.raw(key) {
            Some(v) => parse_time_range(v).with_context(|| {
                format!("key '{key}' in [{}] is not HH:MM:SS-HH:MM:SS: {v:?}", self.section)
            }),
            None => Ok(default),
        }
    }

    pub fn duration(&self, key: &str) -> Result<Option<Duration>> {
        match self.raw(key) {
            Some(v) => parse_duration(v)
                .map(Some)
                .with_context(|| format!("key '{key}' in [{}] is not a valid duration: {v:?}", self.section)),
            None => Ok(None),
        }
    }

    /// Aggregate `KEY_01`, `KEY_02`, ... in numeric order. Falls back to a
    /// bare `KEY` (no suffix), split on commas same as `list()`, if no
    /// suffixed keys exist.
    pub fn multi(&self, base_key: &str) -> Vec<String> {
        let mut pairs: Vec<(u32, String)> = Vec::new();
        if let Some(section) = self.ini.section(Some(self.section.as_str())) {
            collect_suffixed(section, base_key, &mut pairs);
        }
        if pairs.is_empty() {
            if let Some(section) = self.ini.section(Some(GLOBAL_SECTION)) {
                collect_suffixed(section, base_key, &mut pairs);
            }
        }
        if !pairs.is_empty() {
            pairs.sort_by_key(|(n, _)| *n);
            return pairs.into_iter().map(|(_, v)| v).collect();
        }
        self.list(base_key)
    }
}

fn collect_suffixed(section: &ini::Properties, base_key: &str, out: &mut Vec<(u32, String)>) {
    let prefix = format!("{base_key}_");
    for (k, v) in section.iter() {
        if let Some(suffix) = k.strip_prefix(&prefix) {
            if let Ok(n) = suffix.parse::<u32>() {
                out.push((n, v.to_string()));
            }
        }
    }
}

fn parse_time_range(s: &str) -> Result<TimeRange> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| anyhow!("expected HH:MM:SS-HH:MM:SS"))?;
    let start = chrono::NaiveTime::parse_from_str(start.trim(), "%H:%M:%S")?;
    let end = chrono::NaiveTime::parse_from_str(end.trim(), "%H:%M:%S")?;
    Ok(TimeRange { start, end })
}

fn parse_duration(s: &str) -> Result<Duration> {
    let mut total = Duration::ZERO;
    let mut seen = std::collections::HashSet::new();
    for token in s.split_whitespace() {
        let (num, unit) = token.split_at(token.len() - 1);
        if !seen.insert(unit.to_string()) {
            return Err(anyhow!("duration token '{unit}' repeated"));
        }
        let n: u64 = num.parse().with_context(|| format!("bad duration token {token:?}"))?;
        let secs = match unit {
            "d" => n * 86_400,
            "h" => n * 3_600,
            "m" => n * 60,
            "s" => n,
            other => return Err(anyhow!("unknown duration unit '{other}'")),
        };
        total += Duration::from_secs(secs);
    }
    if total.is_zero() && !s.trim().is_empty() {
        return Err(anyhow!("no valid duration tokens in {s:?}"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Ini {
        Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid
MAILTO = global@example.com

[home]
SRC_01 = /home/a
SRC_02 = /home/b
INTERVAL = 1h 30m
"#,
        )
        .unwrap()
    }

    #[test]
    fn falls_back_to_global() {
        let ini = fixture();
        let view = ConfigView::new(&ini, "home");
        assert_eq!(view.str_opt("MAILTO").as_deref(), Some("global@example.com"));
    }

    #[test]
    fn multi_key_sorted_numerically() {
        let ini = fixture();
        let view = ConfigView::new(&ini, "home");
        assert_eq!(view.multi("SRC"), vec!["/home/a", "/home/b"]);
    }

    #[test]
    fn multi_falls_back_to_comma_split_bare_key() {
        let ini = Ini::load_from_str(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
BACKUPLIST = /home/user/docs,/home/user/photos
"#,
        )
        .unwrap();
        let view = ConfigView::new(&ini, "home");
        assert_eq!(
            view.multi("BACKUPLIST"),
            vec!["/home/user/docs", "/home/user/photos"]
        );
    }

    #[test]
    fn duration_parses_compound_tokens() {
        let ini = fixture();
        let view = ConfigView::new(&ini, "home");
        let d = view.duration("INTERVAL").unwrap().unwrap();
        assert_eq!(d, Duration::from_secs(90 * 60));
    }

    #[test]
    fn duration_rejects_repeated_unit() {
        assert!(parse_duration("1h 2h").is_err());
    }

    #[test]
    fn missing_required_key_errors() {
        let ini = fixture();
        let view = ConfigView::new(&ini, "home");
        assert!(view.required_str("NOPE").is_err());
    }

    #[test]
    fn time_range_wrap_across_midnight() {
        let r = parse_time_range("22:00:00-02:00:00").unwrap();
        assert!(r.contains(chrono::NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        assert!(r.contains(chrono::NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(!r.contains(chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }
}
