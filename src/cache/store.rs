//! Asset store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

/// A cached response payload plus the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

/// An asset read back from a store.
#[derive(Debug, Clone)]
pub struct StoredAsset {
  /// The cached entry
  pub entry: AssetEntry,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for asset storage backends.
///
/// Entries are only ever inserted whole or deleted with their generation;
/// nothing mutates a stored entry in place.
pub trait AssetStore: Send + Sync {
  /// Store an entry under `generation` and `key`, replacing any previous one.
  fn put(&self, generation: &str, key: &str, entry: &AssetEntry) -> Result<()>;

  /// Read an entry by `generation` and `key`.
  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredAsset>>;

  /// All generation identifiers with at least one stored entry.
  fn list_generations(&self) -> Result<Vec<String>>;

  /// Delete every entry belonging to `generation`.
  fn delete_generation(&self, generation: &str) -> Result<()>;
}

/// Stable fixed-length row key for a request key.
///
/// Request keys are already normalized paths, but hashing keeps the primary
/// key bounded regardless of path length; the raw key is stored alongside
/// for inspection.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Schema for the asset cache table.
const ASSET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS asset_cache (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_asset_cache_generation
    ON asset_cache(generation);
"#;

/// SQLite-based asset store.
pub struct SqliteAssetStore {
  conn: Mutex<Connection>,
}

impl SqliteAssetStore {
  /// Create a new store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Create a new store at an explicit database path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open asset database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// Create an in-memory store (tests and dry runs).
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory asset database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shelfmark").join("assets.db"))
  }

  /// Run database migrations for the asset table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(ASSET_SCHEMA)
      .map_err(|e| eyre!("Failed to run asset cache migrations: {}", e))?;

    Ok(())
  }
}

impl AssetStore for SqliteAssetStore {
  fn put(&self, generation: &str, key: &str, entry: &AssetEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO asset_cache
           (generation, key_hash, request_key, status, content_type, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          generation,
          key_hash(key),
          key,
          entry.status,
          entry.content_type,
          entry.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store asset {}: {}", key, e))?;

    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredAsset>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body, cached_at FROM asset_cache
         WHERE generation = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare asset query: {}", e))?;

    let row: Option<(u16, Option<String>, Vec<u8>, String)> = stmt
      .query_row(params![generation, key_hash(key)], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, content_type, body, cached_at_str)) => {
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(StoredAsset {
          entry: AssetEntry {
            status,
            content_type,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM asset_cache ORDER BY generation")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let generations: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(generations)
  }

  fn delete_generation(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM asset_cache WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    Ok(())
  }
}

/// In-memory asset store for tests.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryAssetStore {
  inner: Mutex<std::collections::HashMap<(String, String), StoredAsset>>,
}

impl AssetStore for MemoryAssetStore {
  fn put(&self, generation: &str, key: &str, entry: &AssetEntry) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.insert(
      (generation.to_string(), key.to_string()),
      StoredAsset {
        entry: entry.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredAsset>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .get(&(generation.to_string(), key.to_string()))
        .cloned(),
    )
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut generations: Vec<String> = inner.keys().map(|(g, _)| g.clone()).collect();
    generations.sort();
    generations.dedup();
    Ok(generations)
  }

  fn delete_generation(&self, generation: &str) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.retain(|(g, _), _| g != generation);
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
