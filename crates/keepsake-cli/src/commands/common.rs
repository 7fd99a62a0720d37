use std::env;
use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use keepsake_core::db::{LocalRecordStore, RecordQuery, SqliteRecordStore};
use keepsake_core::remote::FileDocumentStore;
use keepsake_core::{
    Note, ProfileCache, Record, RecordId, RecordKind, SyncConfig, SyncEngine, SyncStatus,
};
use serde::Serialize;

use crate::error::CliError;

const DEFAULT_USER_ID: &str = "local";

/// Where this device keeps its data, and who it syncs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliPaths {
    pub db_path: PathBuf,
    pub remote_path: PathBuf,
    pub config_path: PathBuf,
    pub user_id: String,
}

impl CliPaths {
    /// Flags win over `KEEPSAKE_*` env vars, which win over platform dirs
    pub fn resolve(
        db_path: Option<PathBuf>,
        remote_path: Option<PathBuf>,
        config_path: Option<PathBuf>,
        user_id: Option<String>,
    ) -> Result<Self, CliError> {
        Ok(Self {
            db_path: resolve_path(db_path, env::var_os("KEEPSAKE_DB_PATH"), || {
                Ok(data_dir()?.join("keepsake.db"))
            })?,
            remote_path: resolve_path(remote_path, env::var_os("KEEPSAKE_REMOTE_PATH"), || {
                Ok(data_dir()?.join("remote.json"))
            })?,
            config_path: resolve_path(config_path, env::var_os("KEEPSAKE_CONFIG"), || {
                dirs::config_dir()
                    .map(|dir| dir.join("keepsake").join("sync.json"))
                    .ok_or_else(|| CliError::Config("could not resolve config directory".into()))
            })?,
            user_id: resolve_user_id(user_id, env::var("KEEPSAKE_USER").ok()),
        })
    }
}

pub fn resolve_path(
    flag: Option<PathBuf>,
    env_value: Option<OsString>,
    default: impl FnOnce() -> Result<PathBuf, CliError>,
) -> Result<PathBuf, CliError> {
    if let Some(path) = flag {
        return Ok(path);
    }
    match env_value.filter(|value| !value.is_empty()) {
        Some(value) => Ok(PathBuf::from(value)),
        None => default(),
    }
}

pub fn resolve_user_id(flag: Option<String>, env_value: Option<String>) -> String {
    flag.and_then(|value| normalize_content(&value))
        .or_else(|| env_value.and_then(|value| normalize_content(&value)))
        .unwrap_or_else(|| DEFAULT_USER_ID.to_string())
}

fn data_dir() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("keepsake"))
        .ok_or_else(|| CliError::Config("could not resolve data directory".into()))
}

/// A configured engine bound to this device's store and the shared remote
pub struct Device {
    pub engine: SyncEngine,
    pub store: Arc<SqliteRecordStore>,
    pub remote: Arc<FileDocumentStore>,
    pub user_id: String,
}

impl Device {
    pub async fn connect(paths: &CliPaths) -> Result<Self, CliError> {
        let config = SyncConfig::load_from_path(&paths.config_path)?;
        let store = Arc::new(SqliteRecordStore::open(&paths.db_path)?);
        let remote = Arc::new(FileDocumentStore::open(&paths.remote_path)?);
        let engine = SyncEngine::new(remote.clone(), ProfileCache::from_config(&config), config);

        engine
            .configure(paths.user_id.clone(), store.clone())
            .await?;
        // Settle the listeners' first snapshots before reading the store
        engine.flush().await?;
        if let SyncStatus::Error(message) = engine.status() {
            tracing::warn!("{message}");
        }

        Ok(Self {
            engine,
            store,
            remote,
            user_id: paths.user_id.clone(),
        })
    }

    /// Upload pending changes, then release listeners
    pub async fn finish(self) -> Result<(), CliError> {
        self.engine.flush().await?;
        self.engine.stop().await?;
        Ok(())
    }

    pub async fn list_notes(&self, limit: usize) -> Result<Vec<Note>, CliError> {
        let records = self
            .store
            .fetch(&RecordQuery::of_kind(RecordKind::Note).with_limit(limit))
            .await?;
        Ok(records.into_iter().filter_map(into_note).collect())
    }

    /// Find a note by full id or by a unique id prefix
    pub async fn resolve_note(&self, note_query: &str) -> Result<Note, CliError> {
        if let Ok(id) = note_query.parse::<RecordId>() {
            if let Some(note) = self
                .store
                .get(RecordKind::Note, id)
                .await?
                .and_then(into_note)
            {
                return Ok(note);
            }
        }

        let mut matching = self
            .store
            .fetch(&RecordQuery::of_kind(RecordKind::Note))
            .await?
            .into_iter()
            .filter_map(into_note)
            .filter(|note| note.id.to_string().starts_with(note_query))
            .collect::<Vec<Note>>();

        match matching.len() {
            0 => Err(CliError::NoteNotFound(note_query.to_string())),
            1 => Ok(matching.remove(0)),
            _ => {
                let options = matching
                    .iter()
                    .take(3)
                    .map(|note| note.id.to_string().chars().take(13).collect::<String>())
                    .collect::<Vec<_>>()
                    .join(", ");

                Err(CliError::AmbiguousNoteId(format!(
                    "ID prefix '{note_query}' is ambiguous; matches: {options}"
                )))
            }
        }
    }
}

fn into_note(record: Record) -> Option<Note> {
    match record {
        Record::Note(note) => Some(note),
        Record::Profile(_) => None,
    }
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub needs_sync: bool,
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now_ms);
            let marker = if note.needs_sync { "*" } else { "" };

            format!("{short_id:<13}  {preview:<40}  {relative_time}{marker}")
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();

    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        body: note.body.clone(),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
        needs_sync: note.needs_sync,
    }
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let collapsed = note
        .title_preview(usize::MAX)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Split note text into a title (first line) and a body (the rest)
pub fn split_note_content(content: &str) -> (String, String) {
    let mut lines = content.lines();
    let title = lines.next().unwrap_or("").trim().to_string();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    (title, body)
}

pub fn join_note_content(note: &Note) -> String {
    if note.body.is_empty() {
        note.title.clone()
    } else {
        format!("{}\n\n{}", note.title, note.body)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    normalize_content(id).ok_or(CliError::EmptyNoteId)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    if let Err(error) = std::fs::remove_file(&temp_file) {
        tracing::debug!("Failed to remove {}: {error}", temp_file.display());
    }

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let status = match Command::new(editor).arg(file_path).status() {
        Ok(status) => status,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // EDITOR may carry arguments, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };
            Command::new(program).args(parts).arg(file_path).status()?
        }
        Err(err) => return Err(CliError::Io(err)),
    };

    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("keepsake-note-{}-{now}.md", std::process::id()))
}
