use crate::collectors::Metric;
use crate::config::InfluxDBConfig;
use crate::error::{ProbeError, Result};
use reqwest::Client;

// Line protocol cannot carry line breaks at all, so they are dropped.
fn escape_with(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\n' | '\r') {
            continue;
        }
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_key(s: &str) -> String {
    escape_with(s, &[',', '=', ' '])
}

fn escape_measurement(s: &str) -> String {
    escape_with(s, &[',', ' '])
}

/// Formats a slice of metrics into InfluxDB line protocol format.
///
/// The part of the name before the first `_` is the measurement and the rest
/// the field. Consecutive metrics sharing measurement, tags and timestamp are
/// folded into one line unless the field is already on it. Tags with empty
/// values are left out, since line protocol has no way to express them.
pub fn format_metrics(metrics: &[Metric], hostname: &str) -> String {
    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut last_key: Option<(String, String, i64)> = None;
    let mut current_fields: Vec<String> = Vec::new();

    for metric in metrics {
        let mut parts = metric.name.splitn(2, '_');
        let measurement = escape_measurement(parts.next().unwrap_or(&metric.name));
        let field = escape_key(parts.next().unwrap_or("value"));

        let mut tags: Vec<_> = metric.tags.iter().filter(|(_, v)| !v.is_empty()).collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        let tags_str = tags
            .iter()
            .map(|(k, v)| format!(",{}={}", escape_key(k), escape_key(v)))
            .collect::<String>();

        let key = (measurement, tags_str, metric.timestamp);
        if last_key.as_ref() == Some(&key) && !current_fields.contains(&field) {
            // Same group, append field
            current_line.push_str(&format!(",{}={}", field, metric.value));
            current_fields.push(field);
        } else {
            if let Some((_, _, timestamp)) = &last_key {
                lines.push(format!("{current_line} {timestamp}"));
            }
            current_line = format!(
                "{}{},hostname={} {}={}",
                key.0,
                key.1,
                escape_key(hostname),
                field,
                metric.value
            );
            last_key = Some(key);
            current_fields = vec![field];
        }
    }

    if let Some((_, _, timestamp)) = &last_key {
        lines.push(format!("{current_line} {timestamp}"));
    }

    lines.join("\n")
}

/// Exports metrics to InfluxDB, through the v2 API when a bucket is
/// configured and the v1 `/write` endpoint when only a database is.
pub async fn export_metrics(client: &Client, config: &InfluxDBConfig, lines: &str) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }

    let mut request_builder = if let Some(bucket) = &config.bucket {
        let url = format!("{}/api/v2/write", config.url);
        let mut query = vec![("bucket", bucket.as_str()), ("precision", "s")];
        if let Some(org) = &config.org {
            query.push(("org", org.as_str()));
        }
        let mut builder = client.post(&url).query(&query);
        if let Some(token) = &config.token {
            if !token.is_empty() {
                builder = builder.header("Authorization", format!("Token {}", token));
            }
        }
        builder
    } else if let Some(db) = &config.db {
        let url = format!("{}/write", config.url);
        let mut query = vec![("db", db.as_str()), ("precision", "s")];
        if let Some(username) = &config.username {
            query.push(("u", username.as_str()));
        }
        if let Some(password) = &config.password {
            query.push(("p", password.as_str()));
        }
        client.post(&url).query(&query)
    } else {
        return Err(ProbeError::Export(
            "influxdb exporter needs either `bucket` or `db`".to_string(),
        ));
    };

    request_builder = request_builder
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(lines.to_string());

    request_builder.send().await?.error_for_status()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Metric;

    fn metric(name: &str, value: f64, timestamp: i64, tags: &[(&str, &str)]) -> Metric {
        Metric {
            name: name.to_string(),
            value,
            timestamp,
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_format_metrics() {
        let metrics = vec![
            metric("kernel_files_max", 1000.0, 100, &[]),
            metric("kernel_files_allocated", 250.0, 100, &[]),
            metric("kernel_files_allocated_percent", 25.0, 100, &[]),
            metric("processes_total", 42.0, 100, &[]),
        ];

        let formatted = format_metrics(&metrics, "test-host");
        let expected = "kernel,hostname=test-host files_max=1000,files_allocated=250,files_allocated_percent=25 100\nprocesses,hostname=test-host total=42 100";
        assert_eq!(formatted, expected);
    }

    #[test]
    fn test_format_metrics_no_grouping() {
        let metrics = vec![
            metric("network_received", 10.0, 100, &[("interface", "eth0")]),
            metric("kernel_files_max", 1000.0, 100, &[]),
            metric("network_transmitted", 0.5, 100, &[("interface", "eth0")]),
        ];

        let formatted = format_metrics(&metrics, "test-host");
        let expected = "network,interface=eth0,hostname=test-host received=10 100\nkernel,hostname=test-host files_max=1000 100\nnetwork,interface=eth0,hostname=test-host transmitted=0.5 100";
        assert_eq!(formatted, expected);
    }

    #[test]
    fn test_format_logins() {
        let metrics = vec![
            metric("kernel_user_login", 1.0, 1_700_000_000, &[("user", "alice"), ("host", "10.0.0.1")]),
            metric("kernel_user_login", 1.0, 1_700_000_030, &[("user", "bob smith"), ("host", "")]),
        ];

        let formatted = format_metrics(&metrics, "box");
        let expected = "kernel,host=10.0.0.1,user=alice,hostname=box user_login=1 1700000000\nkernel,user=bob\\ smith,hostname=box user_login=1 1700000030";
        assert_eq!(formatted, expected);
    }

    #[test]
    fn test_same_second_logins_stay_separate() {
        let tags = [("user", "alice"), ("host", "10.0.0.1")];
        let metrics = vec![
            metric("kernel_user_login", 1.0, 1_700_000_000, &tags),
            metric("kernel_user_login", 1.0, 1_700_000_000, &tags),
        ];

        let formatted = format_metrics(&metrics, "box");
        let line = "kernel,host=10.0.0.1,user=alice,hostname=box user_login=1 1700000000";
        assert_eq!(formatted, format!("{line}\n{line}"));
    }

    #[test]
    fn test_escapes_backslash_and_drops_newlines() {
        let metrics = vec![metric(
            "kernel_user_login",
            1.0,
            5,
            &[("user", "a\\b"), ("host", "evil\nfake,tag=1 0")],
        )];

        let formatted = format_metrics(&metrics, "box");
        assert_eq!(
            formatted,
            "kernel,host=evilfake\\,tag\\=1\\ 0,user=a\\\\b,hostname=box user_login=1 5"
        );
        assert_eq!(formatted.lines().count(), 1);
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_metrics(&[], "box"), "");
    }
}
