use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use tempfile::Builder;

/// Replaces `path` with `content` through a temporary file in the same
/// directory, creating missing parents first. Readers see either the old
/// file or the new one, never a partial write.
pub fn write_bytes_atomic(path: &Utf8Path, prefix: &str, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())?;
    let mut temp = Builder::new()
        .prefix(prefix)
        .tempfile_in(parent.as_std_path())?;
    temp.write_all(content)?;
    temp.persist(path.as_std_path()).map_err(|err| err.error)?;
    Ok(())
}
