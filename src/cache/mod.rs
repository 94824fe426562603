//! Versioned asset cache with generation-based eviction.
//!
//! One generation of the cache holds the full asset set for one deployed
//! version of the application. Exactly one generation is current at a time;
//! activation swaps the current pointer first and only then reclaims older
//! generations, so a request racing the transition is never served from a
//! half-deleted generation.

mod fetcher;
mod store;

pub use fetcher::{AssetFetcher, FetchFuture, FetchedAsset, HttpFetcher};
pub use store::{AssetEntry, AssetStore, MemoryAssetStore, SqliteAssetStore, StoredAsset};

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Where a served asset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Found in the current generation
  Cache,
  /// Fetched live on a cache miss
  Network,
}

/// A served asset plus its provenance.
#[derive(Debug, Clone)]
pub struct ServedAsset {
  pub entry: AssetEntry,
  pub source: ServeSource,
}

/// Read-through asset cache over a storage backend and a live fetcher.
pub struct AssetCache<S: AssetStore + 'static> {
  store: Arc<S>,
  fetcher: Arc<dyn AssetFetcher>,
  /// Generation names are `<prefix>-<version>`; the eviction sweep only
  /// touches names under this prefix.
  prefix: String,
  current: RwLock<Option<String>>,
}

impl<S: AssetStore + 'static> AssetCache<S> {
  /// Create a cache over `store`, fetching misses through `fetcher`.
  pub fn new(store: S, fetcher: Arc<dyn AssetFetcher>, prefix: &str) -> Self {
    Self {
      store: Arc::new(store),
      fetcher,
      prefix: prefix.to_string(),
      current: RwLock::new(None),
    }
  }

  /// Full generation name for a version tag.
  pub fn generation_name(&self, version: &str) -> String {
    format!("{}-{}", self.prefix, version)
  }

  /// The currently active generation, if any.
  pub fn current_generation(&self) -> Result<Option<String>> {
    let current = self
      .current
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(current.clone())
  }

  /// Fetch and store every asset in `keys` under `generation`.
  ///
  /// All-or-nothing: every asset is fetched before anything is written, and
  /// any fetch failure (or non-cacheable response) fails the whole call so a
  /// partially populated generation can never be activated.
  pub async fn populate(&self, generation: &str, keys: &[String]) -> Result<()> {
    let fetches = keys.iter().map(|key| {
      let key = normalize_key(key);
      let fut = self.fetcher.fetch(&key);
      async move {
        let fetched = fut.await?;
        if !fetched.cacheable {
          return Err(eyre!(
            "Asset {} is not cacheable (status {})",
            key,
            fetched.entry.status
          ));
        }
        Ok((key, fetched.entry))
      }
    });

    let fetched = futures::future::try_join_all(fetches).await?;

    for (key, entry) in &fetched {
      self.store.put(generation, key, entry)?;
    }

    debug!(generation, assets = fetched.len(), "populated generation");
    Ok(())
  }

  /// Make `generation` current, then reclaim every other generation under
  /// this cache's prefix.
  ///
  /// The pointer swap completes before the sweep starts. Sweep failures are
  /// logged and swallowed; stale generations are reclaimed best-effort.
  pub fn activate(&self, generation: &str) -> Result<()> {
    {
      let mut current = self
        .current
        .write()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      *current = Some(generation.to_string());
    }
    debug!(generation, "generation activated");

    match self.store.list_generations() {
      Ok(generations) => {
        for old in generations {
          if old == generation || !old.starts_with(&self.prefix) {
            continue;
          }
          if let Err(e) = self.store.delete_generation(&old) {
            warn!(generation = %old, "failed to delete stale generation: {}", e);
          } else {
            debug!(generation = %old, "deleted stale generation");
          }
        }
      }
      Err(e) => warn!("failed to enumerate generations for sweep: {}", e),
    }

    Ok(())
  }

  /// Serve `request_key` from the current generation, falling back to a live
  /// fetch on a miss.
  ///
  /// A cacheable miss response is written back to the current generation on
  /// a spawned task; the caller never waits on the write-back.
  pub async fn serve(&self, request_key: &str) -> Result<ServedAsset> {
    let key = normalize_key(request_key);
    let current = self.current_generation()?;

    if let Some(generation) = &current {
      if let Some(stored) = self.store.get(generation, &key)? {
        debug!(key = %key, cached_at = %stored.cached_at, "cache hit");
        return Ok(ServedAsset {
          entry: stored.entry,
          source: ServeSource::Cache,
        });
      }
    }

    let fetched = self.fetcher.fetch(&key).await?;

    if fetched.cacheable {
      if let Some(generation) = current {
        let store = Arc::clone(&self.store);
        let entry = fetched.entry.clone();
        let key = key.clone();
        tokio::spawn(async move {
          if let Err(e) = store.put(&generation, &key, &entry) {
            warn!(key = %key, "asset write-back failed: {}", e);
          }
        });
      }
    }

    Ok(ServedAsset {
      entry: fetched.entry,
      source: ServeSource::Network,
    })
  }
}

/// Normalize a request key to an origin-relative path.
///
/// Strips query string and fragment and guarantees a leading slash, so the
/// same resource always maps to the same cache row.
pub fn normalize_key(request_key: &str) -> String {
  let path = request_key
    .split(['?', '#'])
    .next()
    .unwrap_or(request_key);

  if path.is_empty() {
    "/".to_string()
  } else if path.starts_with('/') {
    path.to_string()
  } else {
    format!("/{}", path)
  }
}
