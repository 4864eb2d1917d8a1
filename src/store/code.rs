//! Versioned code history of users.
//!
//! Every submission is an immutable directory `code/<ts>_<hash>`; the `active_code` sidecar key
//! points at the version the user's bot runs with.

use std::fs;

use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::{atomic, GameStore};
use crate::error::{IoResultExt, StoreError, StoreResult};
use crate::token::TokenKind;

/// Free-form options submitted along with a piece of code.
pub type Options = serde_json::Map<String, Value>;

pub(crate) const ACTIVE_CODE_KEY: &str = "active_code";

const CODE_DIR: &str = "code";
const CODE_FILE: &str = "code";
const OPTIONS_FILE: &str = "options.json";
/// A legacy flat `code` file moved aside while being upgraded.
const LEGACY_PENDING_FILE: &str = "code.legacy";
const HASH_LEN: usize = 16;

/// One stored code version.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeVersion {
    /// `<timestamp>_<hash>` name of the version.
    pub id: String,
    /// Source text.
    pub code: String,
    /// Options submitted with the code.
    pub options: Options,
}

fn content_hash(code: &str, options: &Options) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    if !options.is_empty() {
        hasher.update([0u8]);
        // serde_json maps are sorted, so equal options hash equally
        hasher.update(Value::Object(options.clone()).to_string().as_bytes());
    }
    let hex = format!("{:x}", hasher.finalize());
    hex[..HASH_LEN].to_owned()
}

fn is_version_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn hash_of(id: &str) -> Option<&str> {
    id.rsplit_once('_').map(|(_, hash)| hash)
}

impl GameStore {
    /// Store a new code version for `user`, optionally making it the active one.
    ///
    /// The version name embeds a hash of `code` and `options`. Returns the version name.
    ///
    /// # Errors
    /// [`StoreError::DuplicateVersion`] if an identical version exists and there is nothing to
    /// change. Submitting identical code that is stored but not active only repoints the active
    /// version.
    #[instrument(skip(self, code, options))]
    pub fn save_code(
        &self,
        user: &str,
        code: &str,
        options: &Options,
        set_active: bool,
    ) -> StoreResult<String> {
        let user_dir = self.expect_dir(TokenKind::User, user)?;
        let code_dir = user_dir.join(CODE_DIR);
        fs::create_dir_all(&code_dir).at(&code_dir)?;

        let hash = content_hash(code, options);
        let existing = atomic::list_dir(&code_dir)?
            .into_iter()
            .find(|id| hash_of(id) == Some(hash.as_str()));
        if let Some(existing) = existing {
            if set_active && self.get_active_version(user)?.as_deref() != Some(existing.as_str()) {
                info!(version = %existing, "reactivating previous code version");
                self.save_value(user, ACTIVE_CODE_KEY, &existing)?;
                return Ok(existing);
            }
            return Err(StoreError::DuplicateVersion(existing));
        }

        let ctime = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let id = format!("{ctime:020}_{hash}");
        let version_dir = code_dir.join(&id);
        let staging = code_dir.join(format!("{id}.tmp"));
        fs::create_dir(&staging).at(&staging)?;
        atomic::write_atomic(&staging.join(CODE_FILE), code.as_bytes())?;
        atomic::write_json_atomic(&staging.join(OPTIONS_FILE), options)?;
        if version_dir.exists() {
            let _ = fs::remove_dir_all(&staging);
            return Err(StoreError::DuplicateVersion(id));
        }
        fs::rename(&staging, &version_dir).at(&version_dir)?;
        debug!(version = %id, "code version stored");

        if set_active {
            self.save_value(user, ACTIVE_CODE_KEY, &id)?;
        }
        Ok(id)
    }

    /// Name of the code version `user` currently plays with, without loading it.
    pub fn get_active_version(&self, user: &str) -> StoreResult<Option<String>> {
        self.expect_dir(TokenKind::User, user)?;
        self.get_value(user, ACTIVE_CODE_KEY, None)
    }

    /// The code version `user` currently plays with, `None` if nothing was ever submitted.
    pub fn get_active_code(&self, user: &str) -> StoreResult<Option<CodeVersion>> {
        let user_dir = self.expect_dir(TokenKind::User, user)?;
        let Some(id) = self.get_active_version(user)? else {
            return Ok(None);
        };
        match self.get_code_version(user, &id)? {
            Some(version) => Ok(Some(version)),
            None => Err(StoreError::corrupt(
                &user_dir.join(CODE_DIR),
                format!("active version '{id}' does not exist"),
            )),
        }
    }

    /// A specific code version of `user`.
    pub fn get_code_version(&self, user: &str, id: &str) -> StoreResult<Option<CodeVersion>> {
        let user_dir = self.expect_dir(TokenKind::User, user)?;
        if !is_version_id(id) {
            return Ok(None);
        }
        let dir = user_dir.join(CODE_DIR).join(id);
        let Some(code) = atomic::read_text(&dir.join(CODE_FILE))? else {
            return Ok(None);
        };
        let options = atomic::read_json(&dir.join(OPTIONS_FILE))?.unwrap_or_default();
        Ok(Some(CodeVersion {
            id: id.to_owned(),
            code,
            options,
        }))
    }

    /// Names of all code versions of `user`, oldest first.
    pub fn get_code_versions(&self, user: &str) -> StoreResult<Vec<String>> {
        let user_dir = self.expect_dir(TokenKind::User, user)?;
        let code_dir = user_dir.join(CODE_DIR);
        if !code_dir.is_dir() {
            return Ok(vec![]);
        }
        atomic::list_dir(&code_dir)
    }

    /// Upgrade code stored in the legacy flat layout (a `code` file and an `options.json` at the
    /// root of the user directory) to a versioned entry.
    ///
    /// Idempotent and safe to rerun after a crash. Returns true if code was migrated.
    pub fn migrate_legacy_code(&self, user: &str) -> StoreResult<bool> {
        let user_dir = self.expect_dir(TokenKind::User, user)?;
        let legacy = user_dir.join(CODE_DIR);
        let pending = user_dir.join(LEGACY_PENDING_FILE);
        if legacy.is_file() {
            fs::rename(&legacy, &pending).at(&pending)?;
        }
        if !pending.is_file() {
            return Ok(false);
        }

        let code = fs::read_to_string(&pending).at(&pending)?;
        let legacy_options = user_dir.join(OPTIONS_FILE);
        let options: Options = atomic::read_json(&legacy_options)?.unwrap_or_default();
        let set_active = self.get_active_version(user)?.is_none();
        match self.save_code(user, &code, &options, set_active) {
            Ok(_) | Err(StoreError::DuplicateVersion(_)) => {}
            Err(e) => return Err(e),
        }

        atomic::remove_marker(&legacy_options)?;
        atomic::remove_marker(&pending)?;
        info!(user, "legacy code migrated");
        Ok(true)
    }
}
