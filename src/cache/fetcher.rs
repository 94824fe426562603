//! Live asset fetching behind a boxed-future trait.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::pin::Pin;
use url::Url;

use super::store::AssetEntry;

/// Boxed future returned by [`AssetFetcher::fetch`].
pub type FetchFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A response obtained from a live fetch.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
  pub entry: AssetEntry,
  /// Whether this response qualifies for a cache write-back
  /// (same-origin, successful, non-opaque).
  pub cacheable: bool,
}

/// Fetches assets by origin-relative request key.
pub trait AssetFetcher: Send + Sync {
  /// Fetch the asset for `key`.
  ///
  /// A reachable server always yields `Ok`, even for error statuses; only
  /// transport-level failures are errors.
  fn fetch(&self, key: &str) -> FetchFuture<Result<FetchedAsset>>;
}

/// Fetcher that resolves request keys against a fixed base URL over HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  base: Url,
}

impl HttpFetcher {
  /// Create a fetcher rooted at `base_url` (e.g. `https://app.example`).
  pub fn new(base_url: &str) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid base URL {}: {}", base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Base URL {} cannot serve as a base", base_url));
    }

    Ok(Self {
      client: reqwest::Client::new(),
      base,
    })
  }
}

impl AssetFetcher for HttpFetcher {
  fn fetch(&self, key: &str) -> FetchFuture<Result<FetchedAsset>> {
    let client = self.client.clone();
    let origin = self.base.origin();
    // Request keys are origin-relative paths; a leading slash keeps the join
    // anchored at the origin root.
    let url = self.base.join(key.trim_start_matches('/'));

    Box::pin(async move {
      let url = url.map_err(|e| eyre!("Invalid request key: {}", e))?;

      let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      // Redirects may have left the origin; such responses must not be cached.
      let same_origin = response.url().origin() == origin;
      let status = response.status();
      let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
        .to_vec();

      Ok(FetchedAsset {
        entry: AssetEntry {
          status: status.as_u16(),
          content_type,
          body,
        },
        cacheable: same_origin && status.is_success(),
      })
    })
  }
}
