//! Pointer-file creation and sidecar copying.

use crate::error::Result;
use crate::sync::mapper::apply_replacements;
use crate::config::path_extension;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Skipped,
}

/// Writes `.strm` pointer files, at most once per destination unless
/// overwriting is enabled.
pub struct StrmWriter {
    overwrite: bool,
    replacements: Vec<(String, String)>,
}

impl StrmWriter {
    pub fn new(overwrite: bool, replacements: Vec<(String, String)>) -> Self {
        Self {
            overwrite,
            replacements,
        }
    }

    /// Create the pointer file for `target` (its extension is swapped
    /// for `.strm`). An existing pointer with overwrite disabled is a
    /// no-op, which is what keeps re-scans from re-notifying.
    pub fn write(&self, target: &Path, content: &str) -> Result<WriteOutcome> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let strm_path = target.with_extension("strm");

        if strm_path.exists() && !self.overwrite {
            debug!("Pointer file {:?} already exists, skipping", strm_path);
            return Ok(WriteOutcome::Skipped);
        }

        let content = apply_replacements(content, &self.replacements);
        fs::write(&strm_path, content)?;
        info!("Created pointer file {:?}", strm_path);
        Ok(WriteOutcome::Created)
    }
}

/// Copies metadata/artwork/subtitle companions next to a pointer file.
/// Unlike pointer writes, copies always overwrite: re-syncing a source
/// refreshes its sidecars.
pub struct SidecarCopier {
    copy_other_files: bool,
    copy_subtitles: bool,
    other_extensions: HashSet<String>,
    subtitle_extensions: HashSet<String>,
}

impl SidecarCopier {
    pub fn new(
        copy_other_files: bool,
        copy_subtitles: bool,
        other_extensions: HashSet<String>,
        subtitle_extensions: HashSet<String>,
    ) -> Self {
        Self {
            copy_other_files,
            copy_subtitles,
            other_extensions,
            subtitle_extensions,
        }
    }

    /// Copy `source` to `dest` when its extension is in one of the
    /// enabled sets. Returns whether a copy happened.
    pub fn copy_matching(&self, source: &Path, dest: &Path) -> Result<bool> {
        let Some(ext) = path_extension(source) else {
            return Ok(false);
        };

        let wanted = (self.copy_other_files && self.other_extensions.contains(&ext))
            || (self.copy_subtitles && self.subtitle_extensions.contains(&ext));
        if !wanted {
            return Ok(false);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        info!("Copied sidecar {:?} to {:?}", source, dest);
        Ok(true)
    }

    /// Companion files sharing `media`'s stem (`Show.S01E01.nfo`,
    /// `Show.S01E01.en.srt`, …) plus the `-thumb.jpg` artwork. Matching
    /// is a literal string comparison on directory entries, so stems
    /// containing `[` or `]` need no escaping.
    pub fn siblings(media: &Path) -> Vec<PathBuf> {
        let (Some(parent), Some(stem)) = (media.parent(), media.file_stem()) else {
            return Vec::new();
        };
        let stem = stem.to_string_lossy();
        let prefix = format!("{stem}.");
        let thumb_name = format!("{stem}-thumb.jpg");

        let Ok(entries) = fs::read_dir(parent) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path == media || !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix.as_str()) || name == thumb_name {
                found.push(path);
            }
        }
        found.sort();
        found
    }
}
