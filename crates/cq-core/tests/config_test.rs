use cq_core::config::Config;

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.project_name, "cardqueue");
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.store.max_retries, 5);
    assert_eq!(cfg.store.base_delay_ms, 10);
    assert_eq!(cfg.store.max_delay_ms, 160);
    assert_eq!(cfg.registry.stale_after_secs, 90);
    assert_eq!(cfg.registry.offline_after_secs, 300);
    assert_eq!(cfg.registry.sweep_interval_secs, 30);
    assert_eq!(cfg.worker_protocol.poll_rate_per_second, 1);
    assert_eq!(cfg.worker_protocol.stream_heartbeat_secs, 15);
    assert_eq!(cfg.eventbus.subscriber_queue_capacity, 100);
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("cardqueue"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.general.project_name, cfg.general.project_name);
    assert_eq!(parsed.store.sqlite_path, cfg.store.sqlite_path);
    assert_eq!(parsed.registry.stale_after_secs, cfg.registry.stale_after_secs);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[general]
project_name = "my-project"

[registry]
sweep_interval_secs = 15
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.general.project_name, "my-project");
    assert_eq!(cfg.registry.sweep_interval_secs, 15);
    // defaults should fill in the rest
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.store.max_retries, 5);
    cfg.validate().expect("config validates");
}

#[test]
fn invalid_registry_thresholds_fail_validation() {
    let mut cfg = Config::default();
    cfg.registry.stale_after_secs = 500;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("stale_after_secs"));
}

#[test]
fn invalid_poll_rate_fails_validation() {
    let mut cfg = Config::default();
    cfg.worker_protocol.poll_rate_per_second = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("poll_rate_per_second"));
}
