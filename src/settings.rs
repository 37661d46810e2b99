use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

pub const DEFAULT_DEVICE_PORT: &str = "COM8";
pub const DEFAULT_WINDOW_CAPACITY: usize = 40;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    pub device_port: String,
    /// Use the simulated device when the configured port cannot be opened.
    pub fake_fallback: bool,
    /// Always use the simulated device.
    pub simulate: bool,
    pub serial_baud: u32,
    pub sampling_rate_hz: f64,
    pub window_capacity: usize,
    pub refresh_interval_ms: u64,
    pub default_device_id: i64,
    pub device_ids: HashMap<String, i64>,
    pub games: Vec<String>,
    pub show_raw_channels: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_DEVICE_PORT.into(),
            fake_fallback: false,
            simulate: false,
            serial_baud: 115_200,
            sampling_rate_hz: 100.0,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            refresh_interval_ms: 1000,
            default_device_id: 1,
            device_ids: HashMap::new(),
            games: vec!["Aristotle".into(), "MoveSense".into(), "Stack Tower".into()],
            show_raw_channels: false,
        }
    }
}

impl MonitorSettings {
    pub fn device_id_for(&self, port: &str) -> i64 {
        self.device_ids
            .get(port)
            .copied()
            .unwrap_or(self.default_device_id)
    }

    pub fn refresh_interval(&self) -> Duration {
        let debug_mode = std::env::var("STRESSDASH_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            Duration::from_millis(250)
        } else {
            Duration::from_millis(self.refresh_interval_ms.max(1))
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {err}", path.display());
                MonitorSettings::default()
            })
        } else {
            MonitorSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> MonitorSettings {
        self.read().clone()
    }

    /// Apply startup overrides in memory only; the file on disk is untouched.
    pub fn apply<F>(&self, update: F)
    where
        F: FnOnce(&mut MonitorSettings),
    {
        update(&mut self.write());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current settings, overrides included, to disk.
    pub fn save(&self) -> Result<()> {
        self.persist(&self.read())
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &MonitorSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SettingsStore::new(dir.path().join("settings.json")).expect("store");
        let settings = store.current();
        assert_eq!(settings.device_port, "COM8");
        assert_eq!(settings.window_capacity, 40);
        assert_eq!(settings.games.len(), 3);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"device_port": "COM3", "device_ids": {"COM3": 7}}"#).expect("write");

        let settings = SettingsStore::new(path).expect("store").current();
        assert_eq!(settings.device_port, "COM3");
        assert_eq!(settings.device_id_for("COM3"), 7);
        assert_eq!(settings.device_id_for("COM9"), 1);
        assert_eq!(settings.refresh_interval_ms, 1000);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").expect("write");

        let settings = SettingsStore::new(path).expect("store").current();
        assert_eq!(settings, MonitorSettings::default());
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).expect("store");
        store.apply(|settings| settings.fake_fallback = true);
        store.save().expect("save");

        let reloaded = SettingsStore::new(path).expect("reload").current();
        assert!(reloaded.fake_fallback);
    }
}
