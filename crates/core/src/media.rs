//! Media codec: base64 payloads in, base64 payloads out.
//!
//! Input media arrive as named base64 strings (optionally wrapped in a
//! `data:<mime>;base64,` URI) and are written into the backend's input
//! directory so nodes can reference them by file name. Produced media are
//! read back from the output directory and encoded for the response.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Extensions picked up from the output directory.
pub const OUTPUT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "mp4", "webm"];

/// Extensions reported as [`OutputKind::Video`]; everything else is an image.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm"];

/// Marker that introduces a data URI.
const DATA_URI_PREFIX: &str = "data:";

/// A named binary payload in transport form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// File name to write under the destination directory.
    pub name: String,
    /// Standard base64, optionally prefixed with `data:...;base64,`.
    pub data: String,
}

/// Kind of a produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Image,
    Video,
}

impl OutputKind {
    /// Classify by file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Video
        } else {
            Self::Image
        }
    }
}

/// One produced artifact, encoded for the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// Standard base64 of the file contents.
    pub data: String,
}

/// Drop a leading `data:...,` header, if any.
pub fn strip_data_uri(data: &str) -> &str {
    if data.starts_with(DATA_URI_PREFIX) {
        data.split_once(',').map_or(data, |(_, payload)| payload)
    } else {
        data
    }
}

/// Decode one item's payload. ASCII whitespace anywhere in the payload is
/// ignored, so line-wrapped base64 (as produced by `base64 -w 76`) decodes.
pub fn decode_item(item: &MediaItem) -> Result<Vec<u8>, CoreError> {
    let payload: String = strip_data_uri(&item.data)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(payload)
        .map_err(|e| CoreError::InvalidEncoding {
            name: item.name.clone(),
            reason: e.to_string(),
        })
}

/// Whether `name` is a single path component that stays inside its parent
/// directory.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Decode every item and write it to `destination/<name>`.
///
/// All items are validated and decoded before anything is written: a
/// single bad name or payload fails the whole batch and leaves the
/// destination untouched. The destination is created if missing.
pub async fn decode_batch(
    items: &[MediaItem],
    destination: &Path,
) -> Result<Vec<PathBuf>, CoreError> {
    let decoded = items
        .iter()
        .map(|item| {
            if !is_plain_file_name(&item.name) {
                return Err(CoreError::InvalidMediaName(item.name.clone()));
            }
            decode_item(item).map(|bytes| (item.name.as_str(), bytes))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if decoded.is_empty() {
        return Ok(Vec::new());
    }

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| CoreError::io(destination, e))?;

    let mut written = Vec::with_capacity(decoded.len());
    for (name, bytes) in decoded {
        let path = destination.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        written.push(path);
    }

    Ok(written)
}

/// Encode every regular file in `dir` whose extension is in `extensions`,
/// sorted by file name. A missing directory yields no records.
pub async fn encode_directory(
    dir: &Path,
    extensions: &[&str],
) -> Result<Vec<OutputRecord>, CoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::io(dir, e)),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::io(dir, e))?
    {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map_err(|e| CoreError::io(&path, e))?
            .is_file();
        if !is_file {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)) {
            continue;
        }
        let kind = OutputKind::from_extension(ext);
        let filename = entry.file_name().to_string_lossy().into_owned();
        matches.push((filename, kind, path));
    }

    matches.sort_by(|a, b| a.0.cmp(&b.0));

    let mut records = Vec::with_capacity(matches.len());
    for (filename, kind, path) in matches {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        records.push(OutputRecord {
            filename,
            kind,
            data: BASE64.encode(bytes),
        });
    }

    Ok(records)
}

/// Remove everything under `dir` and recreate it empty. A missing
/// directory is simply created.
pub async fn reset_directory(dir: &Path) -> Result<(), CoreError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CoreError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CoreError::io(dir, e))
}
