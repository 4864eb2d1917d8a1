//! Write-once exception reports.

use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::error;

use super::{atomic, GameStore};
use crate::error::{IoResultExt, StoreError, StoreResult};
use crate::token::TokenKind;

const REPORT_FILE: &str = "report.json";

/// A captured failure, with the request that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionReport {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Whatever describes the triggering request (route, arguments...).
    pub context: Value,
    /// Captured failure trace.
    pub trace: String,
}

impl ExceptionReport {
    /// A report stamped with the current time.
    pub fn new(context: Value, trace: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            context,
            trace: trace.into(),
        }
    }
}

impl GameStore {
    /// Store a report under a fresh exception token.
    pub fn save_exception(&self, report: &ExceptionReport) -> StoreResult<String> {
        let token = self.fresh_token(TokenKind::Exception)?;
        let dir = self.dir_of(TokenKind::Exception, &token);
        let staging = dir.with_file_name(format!("{token}.tmp"));
        fs::create_dir(&staging).at(&staging)?;
        atomic::write_json_atomic(&staging.join(REPORT_FILE), report)?;
        fs::rename(&staging, &dir).at(&dir)?;
        error!(%token, trace = %report.trace, "exception recorded");
        Ok(token)
    }

    /// Read back a report.
    pub fn get_exception(&self, token: &str) -> StoreResult<ExceptionReport> {
        let path = self.expect_dir(TokenKind::Exception, token)?.join(REPORT_FILE);
        atomic::read_json(&path)?.ok_or_else(|| StoreError::corrupt(&path, "missing report"))
    }

    /// Tokens of all stored reports.
    pub fn get_exception_tokens(&self) -> StoreResult<Vec<String>> {
        self.tokens(TokenKind::Exception)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn report_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = GameStore::open(tmp.path()).unwrap();
        let report = ExceptionReport::new(json!({ "route": "/play" }), "index out of range");

        let token = store.save_exception(&report).unwrap();

        assert!(token.starts_with('E'));
        assert_eq!(store.classify(&token).unwrap(), TokenKind::Exception);
        assert_eq!(store.get_exception(&token).unwrap(), report);
        assert_eq!(store.get_exception_tokens().unwrap(), vec![token]);
    }
}
