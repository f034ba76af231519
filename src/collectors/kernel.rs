use async_trait::async_trait;
#[cfg(target_os = "linux")]
use chrono::Utc;
#[cfg(target_os = "linux")]
use tracing::error;

use super::{Collector, Metric};

#[cfg(target_os = "linux")]
use super::linux;

pub struct KernelCollector {
    #[cfg(target_os = "linux")]
    reader: linux::kernel::FileHandleReader,
}

impl KernelCollector {
    pub fn new() -> Self {
        KernelCollector {
            #[cfg(target_os = "linux")]
            reader: linux::kernel::FileHandleReader::new(),
        }
    }

    #[cfg(all(test, target_os = "linux"))]
    pub fn new_with_proc_root(proc_root: &std::path::Path) -> Self {
        KernelCollector {
            reader: linux::kernel::FileHandleReader::with_proc_root(proc_root),
        }
    }
}

#[async_trait]
impl Collector for KernelCollector {
    fn name(&self) -> &str {
        "kernel"
    }

    async fn collect(&mut self) -> Vec<Metric> {
        #[cfg(target_os = "linux")]
        {
            let timestamp = Utc::now().timestamp();
            let metric = |name: &str, value: f64| Metric {
                name: name.to_string(),
                value,
                timestamp,
                tags: vec![],
            };

            let max = match self.reader.max_files() {
                Ok(max) => max,
                Err(e) => {
                    error!("failed to collect kernel metrics: {e}");
                    return Vec::new();
                }
            };
            let mut metrics = vec![metric("kernel_files_max", max as f64)];

            let allocated = match self.reader.allocated_files() {
                Ok(allocated) => allocated,
                Err(e) => {
                    error!("failed to read allocated file handles: {e}");
                    return metrics;
                }
            };

            let handles = linux::kernel::FileHandles { max, allocated };
            metrics.push(metric("kernel_files_allocated", allocated as f64));
            metrics.push(metric("kernel_files_allocated_percent", handles.allocated_percent()));
            metrics.push(metric("kernel_files_left", handles.left() as f64));
            metrics
        }

        #[cfg(not(target_os = "linux"))]
        {
            Vec::new()
        }
    }
}
