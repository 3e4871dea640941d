//! Pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the shared pool owned by a [`PoolManager`](crate::PoolManager).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Prefix for worker thread names. Threads are named `{prefix}-{n}`.
    pub thread_name_prefix: String,
    /// How long an idle shared worker waits for work before retiring. Default: 60s.
    pub keep_alive: Duration,
    /// Upper bound on how long `shutdown_and_wait` blocks. Default: 30s.
    pub await_termination: Duration,
    /// Stack size for worker threads in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "rustpar-shared".to_string(),
            keep_alive: Duration::from_secs(60),
            await_termination: Duration::from_secs(30),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_await_termination(mut self, timeout: Duration) -> Self {
        self.await_termination = timeout;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Builds a `std::thread::Builder` for the `index`-th worker.
    pub(crate) fn thread_builder(&self, prefix: &str, index: usize) -> std::thread::Builder {
        let builder = std::thread::Builder::new().name(format!("{}-{}", prefix, index));
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.thread_name_prefix, "rustpar-shared");
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.await_termination, Duration::from_secs(30));
        assert!(config.stack_size.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let config = PoolConfig::default()
            .with_thread_name_prefix("ingest")
            .with_keep_alive(Duration::from_millis(250))
            .with_stack_size(256 * 1024);
        assert_eq!(config.thread_name_prefix, "ingest");
        assert_eq!(config.keep_alive, Duration::from_millis(250));
        assert_eq!(config.stack_size, Some(256 * 1024));
    }
}
