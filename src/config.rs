use crate::app_dirs::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Record snapshots are keyed by this identity.
    pub user: String,
    /// Workout to start when none is given on the command line.
    pub workout: Option<String>,
    /// Audible cue when a capped tracked timer runs out.
    pub cue: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            workout: None,
            cue: true,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(dir) = AppDirs::config_dir() {
            dir.join("config.json")
        } else {
            PathBuf::from("reps_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.user, "default");
        assert_eq!(cfg.workout, None);
        assert!(cfg.cue);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("nope.json"));

        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("config.json"));

        let cfg = Config {
            user: "ada".to_string(),
            workout: Some("starter".to_string()),
            cue: false,
        };
        store.save(&cfg).unwrap();

        assert_eq!(store.load(), cfg);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileConfigStore::with_path(&path);
        assert_eq!(store.load(), Config::default());
    }
}
