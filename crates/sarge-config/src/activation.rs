//! ---
//! sarge_section: "04-declared-configuration"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Atomic file replacement and link swapping."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Every helper here writes to a sibling temporary name first and renames it
//! over the target, so readers see either the old state or the new one.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn sibling_temp(target: &Path, tag: &str) -> Result<PathBuf> {
    let name = target
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", target.display()))?
        .to_string_lossy();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(target.with_file_name(format!(
        ".{name}.{tag}-{}-{seq}",
        std::process::id()
    )))
}

/// Replace `path` with `contents` via write-to-temp and rename.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let temp = sibling_temp(path, "tmp")?;
    let mut file = fs::File::create(&temp)
        .with_context(|| format!("unable to create {}", temp.display()))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .with_context(|| format!("unable to write {}", temp.display()))?;
    drop(file);
    if let Err(err) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(err).with_context(|| format!("unable to move new content into {}", path.display()));
    }
    Ok(())
}

/// Point `link` at `target`, replacing any previous link in one rename.
pub fn swap_symlink(target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let (target, link) = (target.as_ref(), link.as_ref());
    if let Ok(meta) = fs::symlink_metadata(link) {
        if meta.is_dir() {
            return Err(anyhow!(
                "expected symlink at {} but found directory",
                link.display()
            ));
        }
    }
    let temp = sibling_temp(link, "swap")?;
    make_symlink(target, &temp).with_context(|| {
        format!(
            "unable to create symlink {} -> {}",
            temp.display(),
            target.display()
        )
    })?;
    if let Err(err) = fs::rename(&temp, link) {
        let _ = fs::remove_file(&temp);
        return Err(err).with_context(|| format!("unable to activate link {}", link.display()));
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Remove a file or link. Returns `false` when nothing was there.
pub fn remove_if_exists(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("unable to remove {}", path.display())),
    }
}

/// Remove a directory tree. Returns `false` when it was already gone.
pub fn remove_dir_if_exists(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("unable to remove {}", path.display())),
    }
}
