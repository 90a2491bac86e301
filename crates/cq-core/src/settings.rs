use std::path::PathBuf;

use crate::config::{Config, ConfigError};

/// Manages loading and saving settings to a TOML file on disk.
pub struct SettingsManager {
    path: PathBuf,
}

impl SettingsManager {
    /// Create a new `SettingsManager` that reads/writes the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a `SettingsManager` using the default config location
    /// (`~/.config/cardqueue/config.toml`).
    pub fn default_path() -> Self {
        Self { path: Config::default_path() }
    }

    /// Load config from the TOML file on disk.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let text =
            std::fs::read_to_string(&self.path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save config to the TOML file on disk, creating parent directories if
    /// they don't exist.
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let text = config.to_toml()?;
        std::fs::write(&self.path, text).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Load config from disk, falling back to `Config::default()` when the
    /// file is missing or unparseable.
    pub fn load_or_default(&self) -> Config {
        self.load().unwrap_or_default()
    }

    /// Return the file path this manager reads/writes.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tmp_settings_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cq-settings-test-{}", uuid::Uuid::new_v4()));
        dir.join("settings.toml")
    }

    #[test]
    fn save_and_load_roundtrip() {
        let path = tmp_settings_path();
        let mgr = SettingsManager::new(&path);

        let mut cfg = Config::default();
        cfg.general.project_name = "roundtrip-test".into();
        cfg.registry.stale_after_secs = 60;
        cfg.worker_protocol.poll_rate_per_second = 2;

        mgr.save(&cfg).unwrap();
        let loaded = mgr.load().unwrap();

        assert_eq!(loaded.general.project_name, "roundtrip-test");
        assert_eq!(loaded.registry.stale_after_secs, 60);
        assert_eq!(loaded.worker_protocol.poll_rate_per_second, 2);

        // cleanup
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let path = tmp_settings_path();
        let mgr = SettingsManager::new(&path);

        let cfg = mgr.load_or_default();
        assert_eq!(cfg.general.project_name, "cardqueue");
        assert_eq!(cfg.registry.sweep_interval_secs, 30);
    }

    #[test]
    fn load_missing_file_returns_error() {
        let path = tmp_settings_path();
        let mgr = SettingsManager::new(&path);

        let result = mgr.load();
        assert!(result.is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let path = tmp_settings_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"
[general]
project_name = "partial"
"#,
        )
        .unwrap();

        let mgr = SettingsManager::new(&path);
        let cfg = mgr.load().unwrap();

        assert_eq!(cfg.general.project_name, "partial");
        // All other fields should be defaults
        assert_eq!(cfg.registry.stale_after_secs, 90);
        assert_eq!(cfg.worker_protocol.poll_rate_per_second, 1);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_creates_parent_directories() {
        let path = tmp_settings_path();
        assert!(!path.parent().unwrap().exists());

        let mgr = SettingsManager::new(&path);
        mgr.save(&Config::default()).unwrap();

        assert!(path.exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn defaults_are_correct() {
        let cfg = Config::default();
        assert_eq!(cfg.general.project_name, "cardqueue");
        assert_eq!(cfg.registry.stale_after_secs, 90);
        assert_eq!(cfg.registry.offline_after_secs, 300);
        assert_eq!(cfg.worker_protocol.stream_heartbeat_secs, 15);
        assert_eq!(cfg.eventbus.subscriber_queue_capacity, 100);
    }

    #[test]
    fn overwrite_existing_settings() {
        let path = tmp_settings_path();
        let mgr = SettingsManager::new(&path);

        let cfg1 = Config::default();
        mgr.save(&cfg1).unwrap();

        let mut cfg2 = Config::default();
        cfg2.general.project_name = "renamed-board".into();
        mgr.save(&cfg2).unwrap();

        let loaded = mgr.load().unwrap();
        assert_eq!(loaded.general.project_name, "renamed-board");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
