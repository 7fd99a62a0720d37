use crate::commands::common::{normalize_note_identifier, CliPaths, Device};
use crate::error::CliError;

pub async fn run_delete(id: &str, paths: &CliPaths) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let device = Device::connect(paths).await?;
    let note = device.resolve_note(&normalized_id).await?;

    device.engine.delete_note(note.id).await?;
    device.finish().await?;
    println!("{}", note.id);
    Ok(())
}
