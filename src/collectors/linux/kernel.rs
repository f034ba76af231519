use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProbeError, Result};

/// System-wide file handle usage from `/proc/sys/fs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandles {
    pub max: u64,
    pub allocated: u64,
}

impl FileHandles {
    /// Share of `max` in use, rounded to two decimals.
    pub fn allocated_percent(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        set_precision(self.allocated as f64 * 100.0 / self.max as f64, 2)
    }

    pub fn left(&self) -> u64 {
        self.max.saturating_sub(self.allocated)
    }
}

fn set_precision(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[derive(Debug)]
pub struct FileHandleReader {
    proc_root: PathBuf,
}

impl FileHandleReader {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self { proc_root: proc_root.into() }
    }

    pub fn max_files(&self) -> Result<u64> {
        let path = self.proc_root.join("sys/fs/file-max");
        parse_file_max(&read(&path)?)
    }

    pub fn allocated_files(&self) -> Result<u64> {
        let path = self.proc_root.join("sys/fs/file-nr");
        parse_file_nr(&read(&path)?)
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| ProbeError::Open {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_file_max(content: &str) -> Result<u64> {
    let value = content.trim();
    value.parse().map_err(|e| ProbeError::Parse {
        what: "file-max".to_string(),
        reason: format!("{value:?}: {e}"),
    })
}

/// `file-nr` holds `allocated unused max`; only the first column matters.
pub fn parse_file_nr(content: &str) -> Result<u64> {
    let first = content.split_whitespace().next().ok_or_else(|| ProbeError::Parse {
        what: "file-nr".to_string(),
        reason: "empty".to_string(),
    })?;
    first.parse().map_err(|e| ProbeError::Parse {
        what: "file-nr".to_string(),
        reason: format!("{first:?}: {e}"),
    })
}
