#[cfg(target_os = "linux")]
pub mod linux;

pub mod kernel;
pub mod login;
pub mod network;
pub mod process;
pub mod utmp;

use async_trait::async_trait;

// A generic metric point
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    /// Unix time, seconds.
    pub timestamp: i64,
    pub tags: Vec<(String, String)>,
}

/// One metric group. A failing collector logs why and returns nothing for
/// the cycle; it never takes other groups down with it.
#[async_trait]
pub trait Collector: Send {
    fn name(&self) -> &str;
    async fn collect(&mut self) -> Vec<Metric>;
}
