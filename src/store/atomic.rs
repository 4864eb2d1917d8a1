//! Rename based atomic updates.
//!
//! Two primitives stand in for a transaction log:
//! - [`write_atomic`]: write a uniquely named sibling `<name>.<random>.new` file then rename it
//!   over the target, so readers see either the old or the new content. Concurrent writers never
//!   share a temporary file; the last rename wins.
//! - [`replace_dir`]: the tmp/old swap replacing a whole directory. Readers see either the full
//!   old tree or the full new one. If the final rename fails the old tree is moved back; only
//!   when that also fails is [`StoreError::StorageInconsistency`] raised.

use std::{
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, trace, warn};

use crate::error::{IoResultExt, StoreError, StoreResult};

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Replace the content of `path` with `bytes` without ever exposing a half written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut prefix = path.file_name().map(OsString::from).unwrap_or_default();
    prefix.push(".");
    // dropped, hence removed, if anything below fails
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".new")
        .tempfile_in(dir)
        .at(dir)?;
    tmp.write_all(bytes).at(tmp.path())?;
    tmp.persist(path).map_err(|e| e.error).at(path)?;
    Ok(())
}

/// Serialize `value` as JSON and [`write_atomic`] it.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

/// Read a JSON record, `None` if the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).at(path),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Codec {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a small text record, `None` if the file does not exist.
pub(crate) fn read_text(path: &Path) -> StoreResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).at(path),
    }
}

/// Create an empty marker file (a set membership entry).
pub(crate) fn touch(path: &Path) -> StoreResult<()> {
    fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map(drop)
        .at(path)
}

/// Remove a marker file, ignoring a missing one.
pub(crate) fn remove_marker(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e).at(path),
        _ => Ok(()),
    }
}

/// Names of the entries of `dir`, sorted. A missing directory is empty.
///
/// Entries containing a `.` are leftovers of atomic writes and swaps and are skipped.
pub(crate) fn list_dir(dir: &Path) -> StoreResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).at(dir),
    };
    let mut names = vec![];
    for entry in entries {
        let entry = entry.at(dir)?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.contains('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Restore `canonical` from its `.old` sibling when a previous swap was interrupted between
/// its two renames. Returns true if something was restored.
pub(crate) fn recover_dir(canonical: &Path) -> StoreResult<bool> {
    let old = sibling(canonical, ".old");
    if !canonical.exists() && old.is_dir() {
        warn!(?canonical, "restoring subtree left behind by an interrupted swap");
        fs::rename(&old, canonical).at(canonical)?;
        return Ok(true);
    }
    Ok(false)
}

/// Atomically replace the directory `canonical` with one built by `populate`.
///
/// `populate` receives an empty temporary directory to fill.
pub(crate) fn replace_dir<F>(canonical: &Path, populate: F) -> StoreResult<()>
where
    F: FnOnce(&Path) -> StoreResult<()>,
{
    replace_dir_with(canonical, populate, |from, to| fs::rename(from, to))
}

/// [`replace_dir`] with an injectable rename, used to simulate failures.
pub(crate) fn replace_dir_with<F, R>(canonical: &Path, populate: F, mut rename: R) -> StoreResult<()>
where
    F: FnOnce(&Path) -> StoreResult<()>,
    R: FnMut(&Path, &Path) -> io::Result<()>,
{
    let tmp = sibling(canonical, ".tmp");
    let old = sibling(canonical, ".old");

    recover_dir(canonical)?;
    for stale in [&tmp, &old] {
        if stale.exists() {
            fs::remove_dir_all(stale).at(stale)?;
        }
    }

    fs::create_dir(&tmp).at(&tmp)?;
    if let Err(e) = populate(&tmp) {
        let _ = fs::remove_dir_all(&tmp);
        return Err(e);
    }

    let had_old = canonical.exists();
    if had_old {
        if let Err(e) = rename(canonical, &old) {
            let _ = fs::remove_dir_all(&tmp);
            return Err(e).at(canonical);
        }
    }

    if let Err(e) = rename(&tmp, canonical) {
        if had_old {
            if let Err(rollback) = rename(&old, canonical) {
                error!(?canonical, %e, %rollback, "rollback of subtree swap failed");
                return Err(StoreError::StorageInconsistency {
                    path: canonical.to_path_buf(),
                    message: format!(
                        "could not move new tree in ({e}) nor restore the old one ({rollback})"
                    ),
                });
            }
        }
        let _ = fs::remove_dir_all(&tmp);
        return Err(e).at(canonical);
    }

    if had_old {
        // canonical is already the new tree; a leftover .old is removed by the next swap
        if let Err(e) = fs::remove_dir_all(&old) {
            warn!(?old, %e, "could not remove replaced subtree");
        }
    }
    trace!(?canonical, "subtree replaced");
    Ok(())
}
