//! Moving container files between paths and filesystems.

use std::{fs, io, path::Path};

use tracing::debug;

/// Copy `from` to `to` and check the copy has the source's length.
pub(crate) fn copy_verified(from: &Path, to: &Path) -> io::Result<()> {
    let expected = fs::metadata(from)?.len();
    let copied = fs::copy(from, to)?;
    let actual = fs::metadata(to)?.len();
    if copied != expected || actual != expected {
        let _ = fs::remove_file(to);
        return Err(io::Error::other(format!(
            "copy of {} has {actual} bytes, expected {expected}",
            from.display()
        )));
    }
    Ok(())
}

/// Rename, or copy-verify-delete when the rename crosses filesystems.
pub(crate) fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(err) => debug!(
            from = %from.display(),
            to = %to.display(),
            %err,
            "Rename failed, copying instead"
        ),
    }
    copy_verified(from, to)?;
    if let Err(err) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(err);
    }
    Ok(())
}
