// SPDX-License-Identifier: AGPL-3.0
// FreeShare CLI - Application State

use freeshare_core::{AppError, Downloader, SettingsStore, ShareService};

/// Stores and services shared by every command
pub struct AppState {
    pub settings: SettingsStore,
    pub service: ShareService,
    pub downloader: Downloader,
}

impl AppState {
    /// Create application state with all stores initialized
    pub async fn new() -> Result<Self, AppError> {
        let settings = SettingsStore::new()?;
        let service = ShareService::from_settings(&settings.get()).await?;
        let downloader = Downloader::new()?;

        Ok(Self {
            settings,
            service,
            downloader,
        })
    }
}
