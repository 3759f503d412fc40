//! Scratch files for downloaded voice notes.
//!
//! Each download gets its own file named after the voice note's unique id and
//! the current time, so concurrent tasks never collide. The file is removed
//! when the [`ScratchFile`] is dropped, whichever way the voice flow exits.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Extension used when the transport's file path has none.
pub const DEFAULT_AUDIO_EXTENSION: &str = ".oga";

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Create an empty scratch file under `dir` (created if missing).
    pub async fn create(
        dir: &Path,
        unique_id: &str,
        source_path: &str,
    ) -> std::io::Result<(Self, tokio::fs::File)> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(scratch_name(unique_id, source_path, chrono::Utc::now().timestamp_millis()));
        let file = tokio::fs::File::create(&path).await?;
        debug!(path = %path.display(), "Created scratch file");
        Ok((Self { path }, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove scratch file: {e}"),
        }
    }
}

/// `<unique id>_<millis><ext>`, with the extension taken from `source_path`.
fn scratch_name(unique_id: &str, source_path: &str, millis: i64) -> String {
    let extension = Path::new(source_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| DEFAULT_AUDIO_EXTENSION.to_string());
    // Unique ids are alphanumeric in practice; keep path separators out regardless.
    let safe_id: String = unique_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe_id}_{millis}{extension}")
}
