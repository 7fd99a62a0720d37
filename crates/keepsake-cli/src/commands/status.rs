use keepsake_core::SyncSnapshot;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, CliPaths, Device};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub user_id: String,
    pub status: String,
    pub last_sync_at: Option<i64>,
    pub last_sync_at_iso: Option<String>,
    pub pending_changes: usize,
    pub unsaved_writes: usize,
    pub profile_name: String,
}

pub async fn run_status(as_json: bool, paths: &CliPaths) -> Result<(), CliError> {
    let device = Device::connect(paths).await?;
    let snapshot = device.engine.snapshot();
    let profile_name = device.engine.profile_cache().name();
    let item = status_item(&device.user_id, &snapshot, profile_name);
    device.finish().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("user:      {} ({})", item.user_id, item.profile_name);
    println!("status:    {}", item.status);
    println!(
        "last sync: {}",
        item.last_sync_at_iso.as_deref().unwrap_or("never")
    );
    println!("pending:   {}", item.pending_changes);
    if item.unsaved_writes > 0 {
        println!("unsaved:   {}", item.unsaved_writes);
    }
    Ok(())
}

pub fn status_item(user_id: &str, snapshot: &SyncSnapshot, profile_name: String) -> StatusItem {
    StatusItem {
        user_id: user_id.to_string(),
        status: snapshot.status.to_string(),
        last_sync_at: snapshot.last_sync_at,
        last_sync_at_iso: snapshot.last_sync_at.map(format_sync_timestamp),
        pending_changes: snapshot.pending_changes,
        unsaved_writes: snapshot.outbox_len,
        profile_name,
    }
}
