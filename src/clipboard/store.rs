//! Single-slot persistence for the pending clipboard link.
//!
//! At most one pending record exists at a time: writers overwrite, the
//! consumer clears. On disk the record is two string fields under fixed
//! well-known keys in a small key/value table.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Well-known key for the pending link URL.
const KEY_URL: &str = "pending_share_url";
/// Well-known key for the capture timestamp (epoch milliseconds, as text).
const KEY_CAPTURED_AT: &str = "pending_share_captured_at";

/// The persisted pending-link record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
  pub url: String,
  pub captured_at_ms: u64,
}

/// Trait for pending-link storage backends.
pub trait PendingLinkStore: Send + Sync {
  /// Overwrite the record. Idempotent.
  fn set(&self, link: &PendingLink) -> Result<()>;

  /// Read the record, if one exists. Expiry is the caller's concern.
  fn get(&self) -> Result<Option<PendingLink>>;

  /// Remove the record.
  fn clear(&self) -> Result<()>;
}

/// Schema for the key/value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite-backed pending-link store.
pub struct SqlitePendingLinkStore {
  conn: Mutex<Connection>,
}

impl SqlitePendingLinkStore {
  /// Create a new store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Create a new store at an explicit database path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// Create an in-memory store (tests).
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory state database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shelfmark").join("state.db"))
  }
}

impl PendingLinkStore for SqlitePendingLinkStore {
  fn set(&self, link: &PendingLink) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
        params![KEY_URL, link.url],
      )
      .map_err(|e| eyre!("Failed to store pending link: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
        params![KEY_CAPTURED_AT, link.captured_at_ms.to_string()],
      )
      .map_err(|e| eyre!("Failed to store pending link timestamp: {}", e))?;

    Ok(())
  }

  fn get(&self) -> Result<Option<PendingLink>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let read = |key: &str| -> Result<Option<String>> {
      conn
        .query_row(
          "SELECT value FROM kv_store WHERE key = ?",
          params![key],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read {}: {}", key, e))
    };

    let (url, captured_at) = match (read(KEY_URL)?, read(KEY_CAPTURED_AT)?) {
      (Some(url), Some(ts)) => (url, ts),
      _ => return Ok(None),
    };

    let captured_at_ms = captured_at
      .parse::<u64>()
      .map_err(|e| eyre!("Malformed pending link timestamp '{}': {}", captured_at, e))?;

    Ok(Some(PendingLink {
      url,
      captured_at_ms,
    }))
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM kv_store WHERE key IN (?, ?)",
        params![KEY_URL, KEY_CAPTURED_AT],
      )
      .map_err(|e| eyre!("Failed to clear pending link: {}", e))?;

    Ok(())
  }
}

/// In-memory pending-link store for tests.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryPendingLinkStore {
  inner: Mutex<Option<PendingLink>>,
}

impl PendingLinkStore for MemoryPendingLinkStore {
  fn set(&self, link: &PendingLink) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *inner = Some(link.clone());
    Ok(())
  }

  fn get(&self) -> Result<Option<PendingLink>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.clone())
  }

  fn clear(&self) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *inner = None;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sqlite_set_get_clear() {
    let store = SqlitePendingLinkStore::in_memory().expect("open");
    assert_eq!(store.get().expect("get"), None);

    let link = PendingLink {
      url: "https://a.example/x".to_string(),
      captured_at_ms: 1_700_000_000_000,
    };
    store.set(&link).expect("set");
    assert_eq!(store.get().expect("get"), Some(link.clone()));

    // Overwrite is idempotent
    store.set(&link).expect("set");
    assert_eq!(store.get().expect("get"), Some(link));

    store.clear().expect("clear");
    assert_eq!(store.get().expect("get"), None);
  }

  #[test]
  fn test_sqlite_set_overwrites_previous_record() {
    let store = SqlitePendingLinkStore::in_memory().expect("open");

    store
      .set(&PendingLink {
        url: "https://a.example/1".to_string(),
        captured_at_ms: 1,
      })
      .expect("set");
    store
      .set(&PendingLink {
        url: "https://a.example/2".to_string(),
        captured_at_ms: 2,
      })
      .expect("set");

    let link = store.get().expect("get").expect("present");
    assert_eq!(link.url, "https://a.example/2");
    assert_eq!(link.captured_at_ms, 2);
  }

  #[test]
  fn test_memory_store_round_trip() {
    let store = MemoryPendingLinkStore::default();
    let link = PendingLink {
      url: "https://a.example/x".to_string(),
      captured_at_ms: 42,
    };
    store.set(&link).expect("set");
    assert_eq!(store.get().expect("get"), Some(link));
    store.clear().expect("clear");
    assert_eq!(store.get().expect("get"), None);
  }
}
