//! Trigger definitions (`spec.md` §4.10, §6 "snapshots.triggers").

use std::path::PathBuf;
use std::time::Duration;

use capsule_core::time::{bucket_key, Granularity, Timestamp};
use chrono::{Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};

/// A time-of-day a daily/weekly/monthly/yearly timer fires at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    fn matches(&self, ts: Timestamp) -> bool {
        ts.hour() == self.hour && ts.minute() == self.minute
    }
}

/// `spec.md` §4.10 "Triggers: timers (hourly/daily/weekly/monthly at
/// declared times)". Yearly is carried too since `spec.md` §6's
/// retention schema names a `keep_yearly` bucket, implying a matching
/// yearly trigger granularity exists alongside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerTrigger {
    Hourly { minute: u32 },
    Daily { at: TimeOfDay },
    Weekly { weekday: Weekday, at: TimeOfDay },
    Monthly { day_of_month: u32, at: TimeOfDay },
    Yearly { month: u32, day_of_month: u32, at: TimeOfDay },
}

impl TimerTrigger {
    fn granularity(&self) -> Granularity {
        match self {
            TimerTrigger::Hourly { .. } => Granularity::Hourly,
            TimerTrigger::Daily { .. } => Granularity::Daily,
            TimerTrigger::Weekly { .. } => Granularity::Weekly,
            TimerTrigger::Monthly { .. } => Granularity::Monthly,
            TimerTrigger::Yearly { .. } => Granularity::Yearly,
        }
    }

    /// Whether this timer should fire at `now`, given it last fired at
    /// `last_fired` (or never). A timer is due once per bucket, at or
    /// after its declared time-of-day/day — a minute-granularity
    /// scheduler calling this every minute fires it exactly once per
    /// bucket.
    pub fn is_due(&self, now: Timestamp, last_fired: Option<Timestamp>) -> bool {
        let time_matches = match self {
            TimerTrigger::Hourly { minute } => now.minute() == *minute,
            TimerTrigger::Daily { at } => at.matches(now),
            TimerTrigger::Weekly { weekday, at } => now.weekday() == *weekday && at.matches(now),
            TimerTrigger::Monthly { day_of_month, at } => now.day() == *day_of_month && at.matches(now),
            TimerTrigger::Yearly { month, day_of_month, at } => {
                now.month() == *month && now.day() == *day_of_month && at.matches(now)
            }
        };
        if !time_matches {
            return false;
        }
        match last_fired {
            None => true,
            Some(last) => bucket_key(last, self.granularity()) != bucket_key(now, self.granularity()),
        }
    }
}

/// `spec.md` §4.10 "operations (before-build, before-surge-up,
/// before-update)".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTrigger {
    BeforeBuild,
    BeforeSurgeUp,
    BeforeUpdate,
}

/// The kind of filesystem change a watcher reacts to, named by
/// `spec.md` §6's `on_file_changes.change_types`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// `spec.md` §4.10 "file-change watchers (path allow-list, path
/// deny-list, glob include/exclude, min change threshold in bytes,
/// polling interval)".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileChangeTrigger {
    pub watch_paths: Vec<PathBuf>,
    pub exclude_paths: Vec<PathBuf>,
    /// Glob patterns (e.g. `*.toml`), matched against the changed
    /// file's path relative to the watch root it fell under.
    pub file_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub change_types: Vec<ChangeKind>,
    /// Bytes. An individual change below this size is ignored
    /// (`spec.md` §4.10 "min change threshold in bytes").
    pub min_change_threshold: u64,
    #[serde(with = "humantime_serde_duration")]
    pub polling_interval: Duration,
}

impl FileChangeTrigger {
    /// Whether `relative_path` under a watch root is eligible given the
    /// include/exclude glob lists. An empty `file_patterns` list means
    /// "everything is included" (no allow-list configured).
    pub fn path_is_watched(&self, relative_path: &str) -> bool {
        if !self.exclude_patterns.is_empty() && self.exclude_patterns.iter().any(|p| glob_match(p, relative_path)) {
            return false;
        }
        if self.file_patterns.is_empty() {
            return true;
        }
        self.file_patterns.iter().any(|p| glob_match(p, relative_path))
    }
}

/// Translate a small shell-glob subset (`*`, `?`, literal characters)
/// into an anchored regex and match it. Full glob grammar (character
/// classes, brace expansion) is out of scope — `spec.md` §6 only needs
/// the simple `*.ext`-style patterns real config-reload watchers use.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex).map(|re| re.is_match(candidate)).unwrap_or(false)
}

/// `humantime` isn't in this workspace's dependency graph for this
/// crate's `Duration` field; this module gives it a serde-compatible
/// representation (seconds) without pulling in a new dependency
/// purely for config deserialization.
mod humantime_serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn hourly_fires_once_per_hour() {
        let trigger = TimerTrigger::Hourly { minute: 0 };
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        assert!(trigger.is_due(t0, None));
        assert!(!trigger.is_due(t0, Some(t0)));
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap();
        assert!(trigger.is_due(t1, Some(t0)));
    }

    #[test]
    fn daily_requires_matching_time_of_day() {
        let trigger = TimerTrigger::Daily { at: TimeOfDay { hour: 2, minute: 30 } };
        let wrong_time = Utc.with_ymd_and_hms(2026, 1, 1, 2, 31, 0).unwrap();
        assert!(!trigger.is_due(wrong_time, None));
        let right_time = Utc.with_ymd_and_hms(2026, 1, 1, 2, 30, 0).unwrap();
        assert!(trigger.is_due(right_time, None));
    }

    #[test]
    fn glob_matches_extension_patterns() {
        assert!(glob_match("*.toml", "Boltfile.toml"));
        assert!(!glob_match("*.toml", "Boltfile.json"));
        assert!(glob_match("config/*.yaml", "config/app.yaml"));
    }

    #[test]
    fn empty_include_list_means_everything_watched() {
        let trigger = FileChangeTrigger {
            watch_paths: vec![],
            exclude_paths: vec![],
            file_patterns: vec![],
            exclude_patterns: vec!["*.tmp".into()],
            change_types: vec![ChangeKind::Modified],
            min_change_threshold: 0,
            polling_interval: Duration::from_secs(5),
        };
        assert!(trigger.path_is_watched("src/main.rs"));
        assert!(!trigger.path_is_watched("src/scratch.tmp"));
    }
}
