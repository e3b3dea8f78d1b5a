//! Space reclamation after deletion.
//!
//! The block store never frees space, so deleted entries keep their blocks
//! until the container is rewritten.  [`repack`] copies the surviving
//! entries into a temporary container in the same directory, verifies it,
//! and renames it over the original.  The original is untouched until the
//! rename.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::compression::Compression;
use crate::container::{Container, ContainerOptions, OpenMode};
use crate::error::{ArfxError, Result};

/// Sizes before and after a repack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepackStats {
    pub entries:     usize,
    pub size_before: u64,
    pub size_after:  u64,
}

/// Rewrite the container at `path`, re-encoding every block with
/// `compression`.
pub fn repack(path: &Path, compression: Compression) -> Result<RepackStats> {
    let mut src = Container::open(path, OpenMode::Read)?;
    let size_before = src.file_size()?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".arfx-repack-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| ArfxError::open_failed(dir, e))?;

    let names = src.entry_names();
    {
        let mut dst = Container::create(tmp.path(), ContainerOptions { compression })?;
        dst.set_uuid(src.uuid())?;
        for (key, value) in src.attrs().clone() {
            dst.set_attr(&key, value)?;
        }
        for name in &names {
            dst.copy_entry_from(&mut src, name, name, Some(compression))?;
        }
        dst.close()?;
    }

    let check = Container::open(tmp.path(), OpenMode::Read)?;
    if check.entry_names() != names || check.uuid() != src.uuid() {
        return Err(ArfxError::malformed(tmp.path(), "repacked container does not match its source"));
    }
    drop(check);
    drop(src);

    let size_after = fs::metadata(tmp.path())?.len();
    fs::set_permissions(tmp.path(), fs::metadata(path)?.permissions())?;
    tmp.persist(path).map_err(|e| ArfxError::Io(e.error))?;
    debug!(path = %path.display(), entries = names.len(), size_before, size_after, "repacked container");

    Ok(RepackStats { entries: names.len(), size_before, size_after })
}
