use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use crate::config::LoginCollectorConfig;
use crate::error::{ProbeError, Result};

use super::utmp::{self, LoginRecord, RecordType};
use super::{Collector, Metric};

pub const LOGIN_METRIC: &str = "kernel_user_login";

/// Reports logins recorded in wtmp during the trailing window.
pub struct LoginCollector {
    path: PathBuf,
    window: Duration,
}

impl LoginCollector {
    pub fn new(config: LoginCollectorConfig) -> Self {
        let window = i64::try_from(config.window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| {
                warn!(window_secs = config.window_secs, "login window out of range, using 300s");
                Duration::minutes(5)
            });

        LoginCollector { path: config.path, window }
    }

    fn read_log(&self) -> Result<Vec<LoginRecord>> {
        // Closed when `file` drops, on the error paths too.
        let file = File::open(&self.path).map_err(|source| ProbeError::Open {
            path: self.path.clone(),
            source,
        })?;
        let records = utmp::read_records(BufReader::new(file))?;
        Ok(records.iter().map(LoginRecord::from).collect())
    }
}

/// Turns every record newer than `now - window` into a login sample.
///
/// Stream order is kept. Records are not filtered by type, and empty user or
/// host fields do not disqualify a record. A window reaching past the
/// earliest representable time keeps every record.
pub fn recent_logins<I>(records: I, now: DateTime<Utc>, window: Duration) -> Vec<Metric>
where
    I: IntoIterator<Item = LoginRecord>,
{
    let cutoff = now.checked_sub_signed(window);

    records
        .into_iter()
        .filter(|record| cutoff.map_or(true, |cutoff| record.timestamp > cutoff))
        .map(|record| Metric {
            name: LOGIN_METRIC.to_string(),
            value: 1.0,
            timestamp: record.timestamp.timestamp(),
            tags: vec![
                ("user".to_string(), record.user),
                ("host".to_string(), record.host),
            ],
        })
        .collect()
}

#[async_trait]
impl Collector for LoginCollector {
    fn name(&self) -> &str {
        "logins"
    }

    async fn collect(&mut self) -> Vec<Metric> {
        match self.read_log() {
            Ok(records) => {
                let sessions = records
                    .iter()
                    .filter(|r| r.kind() == RecordType::UserProcess)
                    .count();
                debug!(path = ?self.path, records = records.len(), sessions, "read login records");
                recent_logins(records, Utc::now(), self.window)
            }
            Err(e) => {
                error!("failed to read login records: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::utmp::Utmp;
    use std::io::Write;

    fn record(user: &str, host: &str, at: DateTime<Utc>) -> LoginRecord {
        LoginRecord::from(&Utmp::login(user, host, at.timestamp() as i32))
    }

    fn tag<'a>(metric: &'a Metric, key: &str) -> Option<&'a str> {
        metric.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_window_boundary() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let window = Duration::minutes(5);
        let records = vec![
            record("fresh", "a", now - Duration::minutes(4)),
            record("stale", "b", now - Duration::minutes(6)),
            record("edge", "c", now - Duration::minutes(5)),
        ];

        let metrics = recent_logins(records, now, window);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, LOGIN_METRIC);
        assert_eq!(metrics[0].value, 1.0);
        assert_eq!(metrics[0].timestamp, (now - Duration::minutes(4)).timestamp());
        assert_eq!(tag(&metrics[0], "user"), Some("fresh"));
        assert_eq!(tag(&metrics[0], "host"), Some("a"));
    }

    #[test]
    fn test_keeps_stream_order() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let records = vec![
            record("late", "", now - Duration::seconds(10)),
            record("early", "", now - Duration::seconds(200)),
            record("middle", "", now - Duration::seconds(100)),
        ];

        let users: Vec<_> = recent_logins(records, now, Duration::minutes(5))
            .iter()
            .map(|m| tag(m, "user").unwrap().to_string())
            .collect();
        assert_eq!(users, vec!["late", "early", "middle"]);
    }

    #[test]
    fn test_anonymous_record_is_emitted() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let metrics = recent_logins(
            vec![record("", "", now - Duration::seconds(30))],
            now,
            Duration::minutes(5),
        );
        assert_eq!(metrics.len(), 1);
        assert_eq!(tag(&metrics[0], "user"), Some(""));
        assert_eq!(tag(&metrics[0], "host"), Some(""));
    }

    #[tokio::test]
    async fn test_collect_from_file() {
        let now = Utc::now();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for raw in [
            Utmp::login("alice", "10.1.2.3", (now - Duration::hours(2)).timestamp() as i32),
            Utmp::login("bob", "office", (now - Duration::seconds(30)).timestamp() as i32),
        ] {
            file.write_all(&raw.to_bytes()).unwrap();
        }
        // trailing partial record
        file.write_all(&[1u8; 17]).unwrap();
        file.flush().unwrap();

        let mut collector = LoginCollector::new(LoginCollectorConfig {
            enabled: true,
            path: file.path().to_path_buf(),
            window_secs: 300,
        });
        let metrics = collector.collect().await;

        assert_eq!(metrics.len(), 1);
        assert_eq!(tag(&metrics[0], "user"), Some("bob"));
        assert_eq!(tag(&metrics[0], "host"), Some("office"));
    }

    #[test]
    fn test_huge_window_keeps_everything() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let records = vec![
            record("old", "", DateTime::from_timestamp(0, 0).unwrap()),
            record("new", "", now - Duration::seconds(1)),
        ];

        let window = Duration::try_seconds(100_000_000_000_000).unwrap();
        assert_eq!(recent_logins(records, now, window).len(), 2);
    }

    #[tokio::test]
    async fn test_huge_window_from_config_does_not_panic() {
        let now = Utc::now();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&Utmp::login("carol", "", (now - Duration::days(30)).timestamp() as i32).to_bytes())
            .unwrap();
        file.flush().unwrap();

        for window_secs in [100_000_000_000_000, u64::MAX] {
            let mut collector = LoginCollector::new(LoginCollectorConfig {
                enabled: true,
                path: file.path().to_path_buf(),
                window_secs,
            });
            let metrics = collector.collect().await;
            // u64::MAX falls back to the 5 minute default
            let expected = if window_secs == u64::MAX { 0 } else { 1 };
            assert_eq!(metrics.len(), expected);
        }
    }

    #[tokio::test]
    async fn test_missing_log_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = LoginCollector::new(LoginCollectorConfig {
            enabled: true,
            path: dir.path().join("wtmp"),
            window_secs: 300,
        });
        assert!(collector.collect().await.is_empty());
    }
}
