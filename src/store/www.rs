//! Cache of the static files served by the web layer.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use super::atomic;
use crate::error::{IoResultExt, StoreResult};

/// A directory holding `static/` and `templates/`, refreshed as a whole.
#[derive(Debug, Clone)]
pub struct WwwCache {
    root_dir: PathBuf,
}

impl WwwCache {
    pub(crate) fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    /// Replace the cached content with a copy of `www_dir`.
    ///
    /// Uses the tmp/old swap, so the web layer never serves a mix of old and new files.
    pub fn safe_replace_cache(&self, www_dir: &Path) -> StoreResult<()> {
        atomic::replace_dir(&self.root_dir, |tmp| copy_tree(www_dir, tmp))?;
        info!(cache = ?self.root_dir, source = ?www_dir, "www cache refreshed");
        Ok(())
    }

    /// Root of the cache.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Cached static files.
    pub fn static_dir(&self) -> PathBuf {
        self.root_dir.join("static")
    }

    /// Cached templates.
    pub fn template_dir(&self) -> PathBuf {
        self.root_dir.join("templates")
    }
}

fn copy_tree(from: &Path, to: &Path) -> StoreResult<()> {
    for entry in fs::read_dir(from).at(from)? {
        let entry = entry.at(from)?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if entry.file_type().at(&source)?.is_dir() {
            fs::create_dir(&target).at(&target)?;
            copy_tree(&source, &target)?;
        } else {
            fs::copy(&source, &target).at(&target)?;
        }
    }
    Ok(())
}
