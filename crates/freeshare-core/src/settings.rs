// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Settings persistence
//
// Settings are stored in a local JSON file in the platform config dir.

use crate::types::{AppError, AppSettings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// In-memory cache of settings, persisted to disk on changes
pub struct SettingsStore {
    settings: RwLock<AppSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Create a settings store in the platform config dir, loading from disk if available
    pub fn new() -> Result<Self, AppError> {
        let file_path = Self::get_settings_path()?;
        Self::open(file_path)
    }

    /// Create a settings store backed by an explicit file
    pub fn open(file_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let file_path = file_path.into();
        tracing::info!("Settings file path: {:?}", file_path);

        let settings = if file_path.exists() {
            tracing::info!("Loading settings from disk");
            let content = fs::read_to_string(&file_path)
                .map_err(|e| AppError::FileIo(format!("Failed to read settings: {}", e)))?;

            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse settings, using defaults: {}", e);
                AppSettings::default()
            })
        } else {
            tracing::info!("No settings file found, using defaults");
            AppSettings::default()
        };

        let store = Self {
            settings: RwLock::new(settings),
            file_path,
        };

        if !store.file_path.exists() {
            tracing::info!("Creating initial settings file");
            store.persist()?;
        }

        Ok(store)
    }

    fn get_settings_path() -> Result<PathBuf, AppError> {
        let config_dir = directories::ProjectDirs::from("com", "freeshare", "freeshare")
            .ok_or_else(|| AppError::FileIo("Could not determine config directory".to_string()))?
            .config_dir()
            .to_path_buf();

        Ok(config_dir.join("settings.json"))
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn persist(&self) -> Result<(), AppError> {
        let settings = self.get();

        let content = serde_json::to_string_pretty(&settings)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;
        }

        fs::write(&self.file_path, content)
            .map_err(|e| AppError::FileIo(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> AppSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Update settings and persist to disk
    pub fn update(&self, new_settings: AppSettings) -> Result<(), AppError> {
        if new_settings.progress_capacity == 0 {
            return Err(AppError::InvalidConfig(
                "progressCapacity must be at least 1".to_string(),
            ));
        }
        if new_settings.max_allocation_attempts == Some(0) {
            return Err(AppError::InvalidConfig(
                "maxAllocationAttempts must be at least 1".to_string(),
            ));
        }

        {
            let mut settings = self
                .settings
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *settings = new_settings;
        }

        let result = self.persist();
        if result.is_ok() {
            tracing::info!("Settings persisted successfully");
        } else {
            tracing::error!("Failed to persist settings: {:?}", result);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get().progress_capacity, 64);
    }

    #[test]
    fn test_update_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::open(&path).unwrap();
        let mut settings = store.get();
        settings.max_allocation_attempts = Some(25);
        settings.data_dir = dir.path().join("data");
        store.update(settings.clone()).unwrap();

        let reloaded = SettingsStore::open(&path).unwrap();
        assert_eq!(reloaded.get(), settings);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"maxAllocationAttempts": 3}"#).unwrap();

        let store = SettingsStore::open(&path).unwrap();
        let settings = store.get();
        assert_eq!(settings.max_allocation_attempts, Some(3));
        assert_eq!(settings.progress_capacity, 64);
    }

    #[test]
    fn test_rejects_invalid_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json")).unwrap();

        let mut settings = store.get();
        settings.progress_capacity = 0;
        assert!(matches!(
            store.update(settings),
            Err(AppError::InvalidConfig(_))
        ));
    }
}
