use crate::commands::common::{
    capture_editor_input_with_initial, join_note_content, normalize_note_identifier,
    split_note_content, CliPaths, Device,
};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    title: Option<String>,
    body: Option<String>,
    paths: &CliPaths,
) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let device = Device::connect(paths).await?;
    let note = device.resolve_note(&normalized_id).await?;

    let (new_title, new_body) = if title.is_none() && body.is_none() {
        let Some(edited) = capture_editor_input_with_initial(&join_note_content(&note))? else {
            return Err(CliError::EmptyEditedContent);
        };
        split_note_content(&edited)
    } else {
        (
            title.map_or_else(|| note.title.clone(), |value| value.trim().to_string()),
            body.map_or_else(|| note.body.clone(), |value| value.trim().to_string()),
        )
    };

    if new_title == note.title && new_body == note.body {
        device.finish().await?;
        println!("{}", note.id);
        return Ok(());
    }

    let mut updated = note;
    updated.title = new_title;
    updated.body = new_body;
    if updated.is_empty() {
        return Err(CliError::EmptyEditedContent);
    }

    let saved = device.engine.mark_needs_sync(updated).await?;
    device.finish().await?;
    println!("{}", saved.id());
    Ok(())
}
