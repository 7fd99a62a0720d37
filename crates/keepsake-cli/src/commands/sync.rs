use keepsake_core::SyncStatus;

use crate::commands::common::{CliPaths, Device};
use crate::error::CliError;

pub async fn run_sync(paths: &CliPaths) -> Result<(), CliError> {
    let device = Device::connect(paths).await?;
    let result = device.engine.sync_all().await;
    let snapshot = device.engine.snapshot();
    device.finish().await?;
    result?;

    if let SyncStatus::Error(message) = snapshot.status {
        return Err(CliError::SyncFailed(message));
    }
    if snapshot.pending_changes == 0 {
        println!("Sync completed");
    } else {
        println!(
            "Sync completed; {} change(s) still pending",
            snapshot.pending_changes
        );
    }
    Ok(())
}
