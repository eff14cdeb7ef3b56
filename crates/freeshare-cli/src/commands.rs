// SPDX-License-Identifier: AGPL-3.0
// FreeShare CLI - Command Handlers

use crate::state::AppState;
use anyhow::Context;
use freeshare_core::{AppError, SettingsStore, ShareCode, TransferProgress};
use serde::Serialize;
use std::path::PathBuf;

/// Print progress lines until the channel closes
fn spawn_progress_printer(
    progress: async_channel::Receiver<TransferProgress>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_percent = -1i32;
        while let Ok(update) = progress.recv().await {
            let percent = update.percent() as i32;
            if percent != last_percent {
                last_percent = percent;
                eprintln!("{:?}: {}%", update.kind, percent);
            }
        }
    })
}

/// Upload a file and print its share code. Ctrl-C cancels the transfer.
pub async fn upload(state: &AppState, path: PathBuf) -> anyhow::Result<()> {
    let handle = state.service.start_upload(path);
    let printer = spawn_progress_printer(handle.progress());

    let cancel = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling upload");
            cancel.cancel();
        }
    });

    let receipt = handle.wait().await;
    interrupt.abort();
    printer.abort();

    match receipt {
        Ok(receipt) => {
            println!("{}", receipt.code);
            tracing::info!(
                "Shared {} as {} (record {})",
                receipt.display_name,
                receipt.code,
                receipt.record_key
            );
            Ok(())
        }
        Err(AppError::Cancelled) => anyhow::bail!("Upload cancelled"),
        Err(e) => Err(e).context("Upload failed"),
    }
}

/// Resolve a code and download the file
pub async fn download(
    state: &AppState,
    code: String,
    dest: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dest = dest.unwrap_or_else(|| state.settings.get().download_dir);
    let (progress_tx, progress_rx) = async_channel::bounded(state.settings.get().progress_capacity);
    let printer = spawn_progress_printer(progress_rx);

    let result = state
        .service
        .download(&state.downloader, &code, &dest, Some(&progress_tx))
        .await;
    drop(progress_tx);
    let _ = printer.await;

    match result {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(AppError::NotFound) => anyhow::bail!("File not found"),
        Err(e) => Err(e).context("Download failed"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupOutput {
    code: ShareCode,
    display_name: String,
    location: String,
    extension: Option<String>,
}

/// Print what a code resolves to
pub async fn lookup(state: &AppState, code: String) -> anyhow::Result<()> {
    let code: ShareCode = code.parse()?;
    let directory = state.service.directory();

    let Some(resolved) = directory.find_by_code(code).await else {
        anyhow::bail!("File not found");
    };
    let output = LookupOutput {
        code,
        display_name: resolved.display_name,
        location: resolved.location,
        extension: directory.extension_by_code(code).await,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print the location for a code whenever it changes, until Ctrl-C
pub async fn watch(state: &AppState, code: String) -> anyhow::Result<()> {
    let code: ShareCode = code.parse()?;
    let subscription = state.service.directory().subscribe(code, |location| {
        match location {
            Some(location) => println!("{}", location),
            None => println!("-"),
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    subscription.cancel();
    Ok(())
}

/// Print current settings, or update the given fields
pub fn settings(
    store: &SettingsStore,
    data_dir: Option<PathBuf>,
    download_dir: Option<PathBuf>,
    max_attempts: Option<u32>,
) -> anyhow::Result<()> {
    let mut settings = store.get();
    let changed = data_dir.is_some() || download_dir.is_some() || max_attempts.is_some();

    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    if let Some(dir) = download_dir {
        settings.download_dir = dir;
    }
    if let Some(max) = max_attempts {
        settings.max_allocation_attempts = Some(max);
    }

    if changed {
        store.update(settings.clone())?;
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
