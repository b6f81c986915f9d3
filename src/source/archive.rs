use std::io::Read;
use std::path::Path;

use zip::ZipArchive;

use super::{SourceError, open};

/// Reads the single inner file of a zip archive, returning its name and bytes.
///
/// Directory entries are ignored when counting.
pub(super) fn read_single_entry(path: &Path) -> Result<(String, Vec<u8>), SourceError> {
    let mut archive = ZipArchive::new(open(path)?)?;
    let entries: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();

    if entries.len() != 1 {
        return Err(SourceError::ArchiveLayout {
            path: path.to_path_buf(),
            count: entries.len(),
        });
    }

    let mut entry = archive.by_name(&entries[0])?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((entries[0].clone(), bytes))
}
