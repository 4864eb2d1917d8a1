//! Per-token key/value sidecar.
//!
//! The sidecar is one JSON object per token. Updates load the whole object, change some keys and
//! write it back atomically: readers never see a torn file, but two writers updating the same
//! token concurrently can lose one of the updates.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::{atomic, GameStore};
use crate::error::{StoreError, StoreResult};

const SIDECAR_FILE: &str = "db.json";

type Sidecar = BTreeMap<String, Value>;

impl GameStore {
    /// Store `value` under `key` for any registered token, replacing the previous value.
    pub fn save_value<V: Serialize + ?Sized>(&self, token: &str, key: &str, value: &V) -> StoreResult<()> {
        let path = self.sidecar_path(token)?;
        let value = serde_json::to_value(value).map_err(|source| StoreError::Codec {
            path: path.clone(),
            source,
        })?;
        self.save_values(token, [(key, value)])
    }

    /// Store several keys with a single read-modify-write.
    pub fn save_values<'a, I>(&self, token: &str, values: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let path = self.sidecar_path(token)?;
        let mut sidecar: Sidecar = atomic::read_json(&path)?.unwrap_or_default();
        for (key, value) in values {
            sidecar.insert(key.to_owned(), value);
        }
        atomic::write_json_atomic(&path, &sidecar)
    }

    /// Value stored under `key` for `token`, or `default` if none was stored.
    pub fn get_value<V: DeserializeOwned>(&self, token: &str, key: &str, default: V) -> StoreResult<V> {
        let path = self.sidecar_path(token)?;
        let Some(mut sidecar) = atomic::read_json::<Sidecar>(&path)? else {
            return Ok(default);
        };
        match sidecar.remove(key) {
            Some(value) => {
                serde_json::from_value(value).map_err(|source| StoreError::Codec { path, source })
            }
            None => Ok(default),
        }
    }

    fn sidecar_path(&self, token: &str) -> StoreResult<std::path::PathBuf> {
        let kind = self.classify(token)?;
        Ok(self.dir_of(kind, token).join(SIDECAR_FILE))
    }
}
