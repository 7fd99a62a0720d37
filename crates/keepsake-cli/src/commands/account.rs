use keepsake_core::{delete_account, LocalIdentity};

use crate::commands::common::{CliPaths, Device};
use crate::error::CliError;

pub async fn run_delete_account(confirmed: bool, paths: &CliPaths) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ConfirmationRequired);
    }

    let device = Device::connect(paths).await?;
    let identity = LocalIdentity::signed_in(device.user_id.as_str());
    delete_account(
        &device.engine,
        &*device.remote,
        &identity,
        &*device.store,
    )
    .await?;

    println!("Deleted account {}", device.user_id);
    Ok(())
}
