use rustpar::{PoolConfig, PoolManager};
use std::time::Duration;

#[test]
fn test_partial_config_uses_defaults() {
    let config: PoolConfig = serde_json::from_str(
        r#"{ "thread_name_prefix": "ingest", "keep_alive": { "secs": 5, "nanos": 0 } }"#,
    )
    .unwrap();

    assert_eq!(config.thread_name_prefix, "ingest");
    assert_eq!(config.keep_alive, Duration::from_secs(5));
    assert_eq!(config.await_termination, Duration::from_secs(30));
    assert_eq!(config.stack_size, None);
}

#[test]
fn test_manager_keeps_config() {
    let config = PoolConfig::default()
        .with_thread_name_prefix("reports")
        .with_await_termination(Duration::from_secs(2));
    let manager = PoolManager::new(config.clone());
    assert_eq!(manager.config(), &config);
}
