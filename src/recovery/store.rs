//! Persistence port for the recovery attempt counter.
//!
//! The counter must survive a full reload so a crash loop stays bounded
//! across restarts. Both values are always written and cleared together;
//! partial or corrupt state reads as "no prior state". The cooldown-based
//! reset rule lives in the boundary, not here.

use std::path::PathBuf;
use std::sync::Mutex;

/// The two durable values, as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedAttempts {
    pub attempts: u32,
    /// Epoch millis of the last recorded attempt.
    pub last_attempt_ms: i64,
}

pub trait RecoveryStore: Send + Sync {
    fn load(&self) -> Option<PersistedAttempts>;
    fn save(&self, state: PersistedAttempts);
    fn clear(&self);
}

const ATTEMPTS_KEY: &str = "recovery_attempts";
const TIMESTAMP_KEY: &str = "last_attempt_ms";

/// File-backed store: a small JSON object with string-encoded integers
/// (the durable-storage wire contract; values round-trip as strings).
pub struct FileRecoveryStore {
    path: PathBuf,
}

impl FileRecoveryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the platform's local data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("milonga")
            .join("recovery_state.json")
    }
}

impl RecoveryStore for FileRecoveryStore {
    fn load(&self) -> Option<PersistedAttempts> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        // Reading one key without the other is treated as no prior state
        let attempts = value.get(ATTEMPTS_KEY)?.as_str()?.parse().ok()?;
        let last_attempt_ms = value.get(TIMESTAMP_KEY)?.as_str()?.parse().ok()?;
        Some(PersistedAttempts {
            attempts,
            last_attempt_ms,
        })
    }

    fn save(&self, state: PersistedAttempts) {
        let value = serde_json::json!({
            ATTEMPTS_KEY: state.attempts.to_string(),
            TIMESTAMP_KEY: state.last_attempt_ms.to_string(),
        });
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, value.to_string()) {
            tracing::warn!("Failed to persist recovery state: {}", e);
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to clear recovery state: {}", e),
        }
    }
}

/// In-memory store for tests and embedders without durable storage.
#[derive(Default)]
pub struct MemoryRecoveryStore {
    state: Mutex<Option<PersistedAttempts>>,
}

impl RecoveryStore for MemoryRecoveryStore {
    fn load(&self) -> Option<PersistedAttempts> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, state: PersistedAttempts) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
    }

    fn clear(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecoveryStore::new(dir.path().join("state.json"));

        assert!(store.load().is_none());

        let state = PersistedAttempts {
            attempts: 2,
            last_attempt_ms: 1_700_000_000_000,
        };
        store.save(state);
        assert_eq!(store.load(), Some(state));

        store.clear();
        assert!(store.load().is_none());
        // Clearing twice is fine
        store.clear();
    }

    #[test]
    fn test_file_store_values_are_string_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileRecoveryStore::new(path.clone());
        store.save(PersistedAttempts {
            attempts: 3,
            last_attempt_ms: 42,
        });

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["recovery_attempts"], "3");
        assert_eq!(raw["last_attempt_ms"], "42");
    }

    #[test]
    fn test_partial_state_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"recovery_attempts":"2"}"#).unwrap();
        let store = FileRecoveryStore::new(path);
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_state_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileRecoveryStore::new(path);
        assert!(store.load().is_none());
    }
}
