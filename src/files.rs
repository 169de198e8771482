//! Input discovery for hosts that read from disk.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Expand files and directories into an ordered list of image files.
///
/// Files are kept in the order given, even without a known extension.
/// Directories contribute their supported images (not recursive), sorted by
/// name so output numbering is stable.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if a directory cannot be read.
pub fn collect_inputs<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.to_path_buf());
        }
    }
    Ok(files)
}
