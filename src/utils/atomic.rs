//! Atomic file operations
//!
//! Used wherever a file must become visible all at once: migrated logs,
//! the stream version pointer and cache exports.
//!
//! # Pattern
//!
//! 1. Write to `<name>.tmp` next to the target
//! 2. Call sync_all() to flush to disk
//! 3. Rename the temp file over the target (atomic on most filesystems)
//!
//! A reader therefore sees either the old file or the complete new one.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Temp file used while writing `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write content to a file
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> io::Result<()> {
    atomic_write_with(path, |file| file.write_all(content.as_bytes()))
}

/// Atomically write content using a writer function
///
/// If `write_fn` fails the temp file is removed and the target is left
/// untouched.
///
/// # Example
///
/// ```ignore
/// atomic_write_with("data/streams/main-stream-v2.jsonl", |file| {
///     writeln!(file, "{}", line)?;
///     Ok(())
/// })?;
/// ```
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    if let Err(e) = write_fn(&mut file).and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    drop(file);

    fs::rename(&temp_path, path)
}

/// Remove leftover temp files from interrupted writes
///
/// Call this on startup before opening files in `dir`.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
