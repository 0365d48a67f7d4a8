use std::io::Write;

use relaymq::config::{load_config, Config, StorageKind};

const SAMPLE: &str = r#"
[broker]
retry_attempts = 5
retry_delay_ms = 250
max_event_log_size = 500

[dispatch]
tick_interval_ms = 20

[storage]
backend = "redis"
url = "redis://cache.internal:6379/2"

[[queues]]
name = "alerts"
max_size = 2

[[queues]]
name = "transcripts"
priority_ordering = false
dead_letter_enabled = false
"#;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn load_config_matches_toml() {
    let file = write_temp(SAMPLE);
    let cfg: Config = load_config(file.path()).expect("failed to load config");

    assert_eq!(cfg.broker.retry_attempts, 5);
    assert_eq!(cfg.broker.retry_delay_ms, 250);
    assert_eq!(cfg.broker.max_event_log_size, 500);
    assert_eq!(cfg.broker.default_max_queue_size, 1000);
    assert_eq!(cfg.broker.handler_timeout_ms, 30_000);
    assert_eq!(cfg.dispatch.tick_interval_ms, 20);
    assert_eq!(cfg.storage.backend, StorageKind::Redis);
    assert_eq!(cfg.storage.url, "redis://cache.internal:6379/2");
    assert_eq!(cfg.storage.key_prefix, "relaymq:queue:");

    assert_eq!(cfg.queues.len(), 2);
    let alerts = cfg.queues[0].options(cfg.broker.default_max_queue_size);
    assert_eq!(alerts.max_size, 2);
    assert!(alerts.dead_letter_enabled);
    let transcripts = cfg.queues[1].options(cfg.broker.default_max_queue_size);
    assert_eq!(transcripts.max_size, 1000);
    assert!(!transcripts.priority_ordering);
    assert!(!transcripts.dead_letter_enabled);
}

#[test]
fn explicit_path_is_loaded() {
    let file = write_temp("[broker]\nretry_attempts = 9\n");
    let path = file.path().to_str().expect("utf-8 path");
    let cfg = Config::load(Some(path)).expect("load");
    assert_eq!(cfg.broker.retry_attempts, 9);
}

#[test]
fn unknown_backend_is_rejected() {
    let file = write_temp("[storage]\nbackend = \"carrier-pigeon\"\n");
    assert!(load_config(file.path()).is_err());
}

#[test]
fn missing_file_is_an_error() {
    assert!(load_config("/definitely/not/here/relaymq.toml").is_err());
}
