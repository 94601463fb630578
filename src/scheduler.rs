//! decides which sets are eligible to run at invocation time.

use crate::config::SetSpec;
use crate::interval_cache::IntervalCache;
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, info};

pub struct ScheduleOptions<'a> {
    pub now: chrono::DateTime<chrono::Local>,
    pub force: bool,
    pub selected: Option<&'a [String]>,
}

/// Applies the eligibility filters in order, each short-circuiting the
/// set out. Returns survivors sorted by `pri` ascending (callers pass
/// already-`pri`-sorted input, so a stable filter preserves that order).
pub async fn select<'a>(
    sets: &'a [SetSpec],
    cache: &IntervalCache,
    opts: &ScheduleOptions<'_>,
) -> Vec<&'a SetSpec> {
    let mut queue = Vec::new();
    for set in sets {
        if set.disabled {
            debug!(set = %set.name, "dropped: disabled");
            continue;
        }

        if let Some(selected) = opts.selected {
            let matched = selected
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&set.name));
            if !matched {
                continue;
            }
        }

        if !opts.force && !set.run_time.contains(opts.now.time()) {
            debug!(set = %set.name, "dropped: outside runtime window");
            continue;
        }

        if !opts.force {
            if let Some(interval) = set.interval {
                if !interval.is_zero() {
                    let last_run = cache.last_run(&set.name);
                    let elapsed = SystemTime::from(opts.now)
                        .duration_since(last_run)
                        .unwrap_or_default();
                    if elapsed < interval {
                        debug!(set = %set.name, ?elapsed, ?interval, "dropped: interval not elapsed");
                        continue;
                    }
                }
            }
        }

        if set.ping {
            match set.ping_host() {
                Ok(Some(host)) => {
                    if !ping_host(&host).await {
                        info!(set = %set.name, %host, "dropped: ping failed");
                        continue;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    info!(set = %set.name, %err, "dropped: ping configuration error");
                    continue;
                }
            }
        }

        queue.push(set);
    }
    queue
}

async fn ping_host(host: &str) -> bool {
    let status = Command::new("ping")
        .args(["-c", "3", "-n", "-w", "60", host])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    matches!(status, Ok(s) if s.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_all, view::TimeRange};
    use chrono::{Local, NaiveTime, TimeZone};
    use ini::Ini;

    fn sets(src: &str) -> Vec<SetSpec> {
        load_all(&Ini::load_from_str(src).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn outside_runtime_window_is_dropped_without_force() {
        let ini = sets(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /a
DST = /b
BACKUPLIST = /a
RUNTIME = 02:00:00-04:00:00
"#,
        );
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = IntervalCache::new(cache_dir.path());
        let noon = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let opts = ScheduleOptions {
            now: noon,
            force: false,
            selected: None,
        };
        let queue = select(&ini, &cache, &opts).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn force_ignores_runtime_window() {
        let ini = sets(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /a
DST = /b
BACKUPLIST = /a
RUNTIME = 02:00:00-04:00:00
"#,
        );
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = IntervalCache::new(cache_dir.path());
        let noon = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let opts = ScheduleOptions {
            now: noon,
            force: true,
            selected: None,
        };
        let queue = select(&ini, &cache, &opts).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn disabled_set_is_always_dropped() {
        let ini = sets(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /a
DST = /b
BACKUPLIST = /a
DISABLED = true
"#,
        );
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = IntervalCache::new(cache_dir.path());
        let now = Local::now();
        let opts = ScheduleOptions {
            now,
            force: true,
            selected: None,
        };
        let queue = select(&ini, &cache, &opts).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn interval_gates_reruns() {
        let ini = sets(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[home]
SRC = /a
DST = /b
BACKUPLIST = /a
INTERVAL = 1h
"#,
        );
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = IntervalCache::new(cache_dir.path());
        let now = Local::now();
        cache
            .record_run("home", SystemTime::from(now) - std::time::Duration::from_secs(30 * 60))
            .unwrap();
        let opts = ScheduleOptions {
            now,
            force: false,
            selected: None,
        };
        assert!(select(&ini, &cache, &opts).await.is_empty());

        cache
            .record_run("home", SystemTime::from(now) - std::time::Duration::from_secs(61 * 60))
            .unwrap();
        assert_eq!(select(&ini, &cache, &opts).await.len(), 1);
    }

    #[tokio::test]
    async fn selection_list_is_case_insensitive() {
        let ini = sets(
            r#"
[Global]
PIDFILE = /var/run/jabs.pid

[Home]
SRC = /a
DST = /b
BACKUPLIST = /a
"#,
        );
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = IntervalCache::new(cache_dir.path());
        let now = Local::now();
        let selected = vec!["home".to_string()];
        let opts = ScheduleOptions {
            now,
            force: true,
            selected: Some(&selected),
        };
        assert_eq!(select(&ini, &cache, &opts).await.len(), 1);
    }

    #[test]
    fn whole_day_contains_everything() {
        let r = TimeRange::whole_day();
        assert!(r.contains(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        assert!(r.contains(NaiveTime::from_hms_opt(23, 59, 0).unwrap()));
    }
}
