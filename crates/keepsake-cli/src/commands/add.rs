use keepsake_core::Note;

use crate::commands::common::{resolve_note_content, split_note_content, CliPaths, Device};
use crate::error::CliError;

pub async fn run_add(content_parts: &[String], paths: &CliPaths) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let (title, body) = split_note_content(&content);

    let device = Device::connect(paths).await?;
    let saved = device.engine.mark_needs_sync(Note::new(title, body)).await?;
    device.finish().await?;

    println!("{}", saved.id());
    Ok(())
}
