//! Configuration acceptance tests.
//!
//! Configuration files drive run-loop construction and messaging sizes.

use super::common::{wait_until, Counter};
use rl_common::config::{CatchUpPolicy, CoreConfig};
use rl_common::error::CoreError;
use rl_common::message::Message;
use rl_runtime::bus::Bus;
use rl_runtime::queue::SyncQueue;
use rl_runtime::run_loop::RunLoop;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const LOOP_CONFIG: &str = r#"
[run_loop]
name = "sensor-loop"
max_wait = "250ms"
catch_up = "skip_missed"

[messaging]
queue_capacity = 16
bus_capacity = 32

[metrics]
enabled = false
"#;

#[test]
fn test_shipped_default_config_matches_builtins() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let loaded = CoreConfig::from_file(&path).unwrap();
    let builtin = CoreConfig::default();

    assert_eq!(loaded.run_loop.name, builtin.run_loop.name);
    assert_eq!(loaded.run_loop.max_wait, builtin.run_loop.max_wait);
    assert_eq!(loaded.run_loop.catch_up, builtin.run_loop.catch_up);
    assert_eq!(loaded.messaging.queue_capacity, builtin.messaging.queue_capacity);
    assert_eq!(loaded.messaging.bus_capacity, builtin.messaging.bus_capacity);
    assert_eq!(loaded.metrics.histogram_size, builtin.metrics.histogram_size);
}

#[test]
fn test_run_loop_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(LOOP_CONFIG.as_bytes()).unwrap();

    let config = CoreConfig::from_file(file.path()).unwrap();
    assert_eq!(config.run_loop.max_wait, Duration::from_millis(250));
    assert_eq!(config.run_loop.catch_up, CatchUpPolicy::SkipMissed);

    let run_loop = RunLoop::from_config(&config).unwrap();
    assert_eq!(run_loop.name(), "sensor-loop");

    let counter = Counter::new();
    let handle = run_loop.register(100.0, counter.tick());
    assert!(wait_until(Duration::from_millis(500), || counter.get() >= 3));
    run_loop.unregister(handle);

    // Metrics were disabled in the file.
    assert_eq!(run_loop.metrics().total_wakes, 0);

    let queue = SyncQueue::<Message>::with_capacity(config.messaging.queue_capacity);
    let bus = Bus::with_capacity(config.messaging.bus_capacity);
    assert_eq!(queue.capacity(), 15);
    assert_eq!(bus.capacity(), 31);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = CoreConfig::from_toml("[messaging]\nbus_capacity = 1\n").unwrap();
    match RunLoop::from_config(&config) {
        Err(CoreError::Config(msg)) => assert!(msg.contains("bus_capacity"), "{msg}"),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_malformed_file_reports_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[run_loop]\nmax_wait = \"soon\"\n").unwrap();

    assert!(CoreConfig::from_file(file.path()).is_err());
    let missing = file.path().with_extension("missing");
    let err = CoreConfig::from_file(&missing).unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}
