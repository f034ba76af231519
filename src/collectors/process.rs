use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{error, warn};

use crate::error::{ProbeError, Result};

use super::{Collector, Metric};

/// Process counts by the first letter of their `ps` state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessStates {
    pub wait: u64,
    pub blocked: u64,
    pub zombies: u64,
    pub stopped: u64,
    pub running: u64,
    pub sleeping: u64,
    pub idle: u64,
    pub exit: u64,
    pub unknown: u64,
    pub total: u64,
    /// Codes that matched no state; not part of any count.
    pub unrecognized: u64,
}

impl ProcessStates {
    pub fn tally<'a, I>(codes: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut states = Self::default();
        for code in codes {
            let Some(first) = code.chars().next() else {
                continue;
            };
            if let Err(e) = states.record(first) {
                warn!("processes: {e} from ps");
                states.unrecognized += 1;
            }
        }
        states
    }

    /// Tallies `ps axo state` output, skipping its `STAT` header.
    pub fn from_ps_output(output: &str) -> Self {
        let mut fields = output.split_whitespace().peekable();
        if fields.peek() == Some(&"STAT") {
            fields.next();
        }
        Self::tally(fields)
    }

    fn record(&mut self, code: char) -> Result<()> {
        let counter = match code {
            'W' => &mut self.wait,
            // uninterruptible or disk sleep
            'U' | 'D' | 'L' => &mut self.blocked,
            'Z' => &mut self.zombies,
            'T' => &mut self.stopped,
            'R' => &mut self.running,
            'S' => &mut self.sleeping,
            'I' => &mut self.idle,
            'X' => &mut self.exit,
            '?' => &mut self.unknown,
            other => return Err(ProbeError::UnknownProcessState(other)),
        };
        *counter += 1;
        self.total += 1;
        Ok(())
    }

    fn counters(&self) -> [(&'static str, u64); 10] {
        [
            ("processes_wait", self.wait),
            ("processes_blocked", self.blocked),
            ("processes_zombies", self.zombies),
            ("processes_stopped", self.stopped),
            ("processes_running", self.running),
            ("processes_sleeping", self.sleeping),
            ("processes_idle", self.idle),
            ("processes_exit", self.exit),
            ("processes_unknown", self.unknown),
            ("processes_total", self.total),
        ]
    }
}

async fn exec_ps() -> Result<String> {
    let output = Command::new("ps")
        .args(["axo", "state"])
        .output()
        .await
        .map_err(|e| ProbeError::Command {
            command: "ps axo state".to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ProbeError::Command {
            command: "ps axo state".to_string(),
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct ProcessCollector;

impl ProcessCollector {
    pub fn new() -> Self {
        ProcessCollector
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "processes"
    }

    async fn collect(&mut self) -> Vec<Metric> {
        let output = match exec_ps().await {
            Ok(output) => output,
            Err(e) => {
                error!("failed to call ps command: {e}");
                return Vec::new();
            }
        };

        let timestamp = Utc::now().timestamp();
        ProcessStates::from_ps_output(&output)
            .counters()
            .into_iter()
            .map(|(name, count)| Metric {
                name: name.to_string(),
                value: count as f64,
                timestamp,
                tags: vec![],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally() {
        let states = ProcessStates::tally(["R", "S", "S", "Z", "?"]);
        assert_eq!(states.running, 1);
        assert_eq!(states.sleeping, 2);
        assert_eq!(states.zombies, 1);
        assert_eq!(states.unknown, 1);
        assert_eq!(states.total, 5);
        assert_eq!(states.blocked, 0);
    }

    #[test]
    fn test_first_letter_decides() {
        let states = ProcessStates::tally(["Ss", "R+", "D<", "Sl", "I<", "T", "W", "X", "L", "U"]);
        assert_eq!(states.sleeping, 2);
        assert_eq!(states.running, 1);
        assert_eq!(states.blocked, 3);
        assert_eq!(states.idle, 1);
        assert_eq!(states.stopped, 1);
        assert_eq!(states.wait, 1);
        assert_eq!(states.exit, 1);
        assert_eq!(states.total, 10);
    }

    #[test]
    fn test_unrecognized_code_is_not_counted() {
        let states = ProcessStates::tally(["R", "Q", "S"]);
        assert_eq!(states.total, 2);
        assert_eq!(states.unrecognized, 1);
    }

    #[test]
    fn test_ps_output_header() {
        let output = "STAT\nSs\nS\nR+\nZ\n";
        let states = ProcessStates::from_ps_output(output);
        assert_eq!(states.total, 4);
        assert_eq!(states.sleeping, 2);
        assert_eq!(states.running, 1);
        assert_eq!(states.zombies, 1);

        let counters = states.counters();
        assert_eq!(counters.len(), 10);
        assert_eq!(counters[9], ("processes_total", 4));
    }
}
