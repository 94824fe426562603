//! The worker event loop.
//!
//! Wires the asset cache, share intake and clipboard fallback behind one
//! channel of events. Execution is single-threaded per worker: events are
//! handled one at a time, but a handler may suspend at I/O boundaries, so
//! nothing here assumes exclusive access to shared state between awaits.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::{AssetCache, AssetStore, HttpFetcher, SqliteAssetStore};
use crate::clipboard::{
  ClipboardLinkDetector, PendingLinkStore, SqlitePendingLinkStore, SystemClipboard,
};
use crate::config::Config;
use crate::request::{FetchRequest, FetchResponse};
use crate::session::{SessionId, SessionRegistry};
use crate::share::{ShareEvent, ShareIntakeRouter};

/// Events dispatched into the worker.
#[derive(Debug)]
pub enum WorkerEvent {
  /// An inbound request from the dispatching runtime
  Request {
    request: FetchRequest,
    respond_to: oneshot::Sender<Result<FetchResponse>>,
  },
  /// UI focus/visibility signal driving the clipboard fallback
  ClipboardCheck,
  /// A client session was torn down
  SessionClosed(SessionId),
  /// Stop the event loop
  Shutdown,
}

/// Cloneable sender half used to dispatch events into a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  /// Dispatch a request and wait for its response.
  #[allow(dead_code)]
  pub async fn request(&self, request: FetchRequest) -> Result<FetchResponse> {
    let (tx, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerEvent::Request {
        request,
        respond_to: tx,
      })
      .map_err(|_| eyre!("worker is gone"))?;
    rx.await.map_err(|_| eyre!("worker dropped the request"))?
  }

  /// Trigger one clipboard check.
  pub fn clipboard_check(&self) {
    let _ = self.tx.send(WorkerEvent::ClipboardCheck);
  }

  /// Notify the worker that a session was torn down.
  #[allow(dead_code)]
  pub fn session_closed(&self, session_id: SessionId) {
    let _ = self.tx.send(WorkerEvent::SessionClosed(session_id));
  }

  /// Ask the worker to stop after the events already queued.
  pub fn shutdown(&self) {
    let _ = self.tx.send(WorkerEvent::Shutdown);
  }
}

/// The worker owning all three components and their event loop.
pub struct Worker<S: AssetStore + 'static, P: PendingLinkStore> {
  cache: AssetCache<S>,
  router: ShareIntakeRouter,
  detector: ClipboardLinkDetector<P>,
  version: String,
  precache: Vec<String>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl Worker<SqliteAssetStore, SqlitePendingLinkStore> {
  /// Build a worker from configuration, with on-disk stores and a real
  /// HTTP fetcher and system clipboard.
  pub fn from_config(
    config: &Config,
    registry: Arc<dyn SessionRegistry>,
  ) -> Result<(Self, WorkerHandle)> {
    let (asset_store, link_store) = match &config.data_dir {
      Some(dir) => {
        std::fs::create_dir_all(dir)
          .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
        (
          SqliteAssetStore::open_at(&dir.join("assets.db"))?,
          SqlitePendingLinkStore::open_at(&dir.join("state.db"))?,
        )
      }
      None => (SqliteAssetStore::open()?, SqlitePendingLinkStore::open()?),
    };

    let fetcher = Arc::new(HttpFetcher::new(&config.assets.base_url)?);
    let cache = AssetCache::new(asset_store, fetcher, &config.assets.cache_prefix);

    let router = ShareIntakeRouter::new(
      registry,
      Duration::from_millis(config.share.grace_delay_ms),
      &config.share.app_root,
    );

    let detector = ClipboardLinkDetector::new(link_store, Box::new(SystemClipboard))
      .with_cooldown_ms(config.clipboard.cooldown_ms)
      .with_max_age_ms(config.clipboard.pending_max_age_ms);

    Ok(Self::with_parts(
      cache,
      router,
      detector,
      &config.assets.version,
      config.assets.precache.clone(),
    ))
  }
}

impl<S: AssetStore + 'static, P: PendingLinkStore> Worker<S, P> {
  /// Assemble a worker from already-built components (tests inject fakes).
  pub fn with_parts(
    cache: AssetCache<S>,
    router: ShareIntakeRouter,
    detector: ClipboardLinkDetector<P>,
    version: &str,
    precache: Vec<String>,
  ) -> (Self, WorkerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
      Self {
        cache,
        router,
        detector,
        version: version.to_string(),
        precache,
        rx,
      },
      WorkerHandle { tx },
    )
  }

  /// Populate and activate this version's generation, then process events
  /// until shutdown.
  pub async fn run(mut self) -> Result<()> {
    let generation = self.cache.generation_name(&self.version);
    if !self.precache.is_empty() {
      self.cache.populate(&generation, &self.precache).await?;
    }
    self.cache.activate(&generation)?;
    info!(generation, "worker ready");

    while let Some(event) = self.rx.recv().await {
      match event {
        WorkerEvent::Request {
          request,
          respond_to,
        } => {
          let response = self.handle_request(&request).await;
          // The requester may have gone away; nothing to do then.
          let _ = respond_to.send(response);
        }
        WorkerEvent::ClipboardCheck => self.handle_clipboard_check().await,
        WorkerEvent::SessionClosed(session_id) => self.router.session_closed(session_id),
        WorkerEvent::Shutdown => break,
      }
    }

    Ok(())
  }

  async fn handle_request(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if let Some(response) = self.router.intercept(request).await {
      return Ok(response);
    }

    let served = self.cache.serve(&request.path).await?;
    debug!(path = %request.path, source = ?served.source, "served asset");
    Ok(FetchResponse {
      status: served.entry.status,
      content_type: served.entry.content_type,
      location: None,
      body: served.entry.body,
    })
  }

  async fn handle_clipboard_check(&self) {
    let mut found = None;
    match self
      .detector
      .check_and_deliver(|url| found = Some(url.to_string()))
    {
      Ok(outcome) => debug!(?outcome, "clipboard check"),
      Err(e) => {
        warn!("clipboard check failed: {}", e);
        return;
      }
    }

    if let Some(url) = found {
      let outcome = self
        .router
        .route(ShareEvent {
          url: Some(url),
          title: None,
          text: None,
        })
        .await;
      debug!(?outcome, "clipboard link routed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{AssetEntry, AssetFetcher, FetchFuture, FetchedAsset, MemoryAssetStore};
  use crate::clipboard::{MemoryPendingLinkStore, NoClipboard};
  use crate::session::{MemorySessionRegistry, SessionMessage};
  use crate::share::SHARE_TARGET_PATH;
  use std::collections::HashMap;

  struct MapFetcher(HashMap<String, String>);

  impl MapFetcher {
    fn new(pairs: &[(&str, &str)]) -> Self {
      Self(
        pairs
          .iter()
          .map(|(k, v)| (k.to_string(), v.to_string()))
          .collect(),
      )
    }
  }

  impl AssetFetcher for MapFetcher {
    fn fetch(&self, key: &str) -> FetchFuture<Result<FetchedAsset>> {
      let result = self
        .0
        .get(key)
        .map(|body| FetchedAsset {
          entry: AssetEntry {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.as_bytes().to_vec(),
          },
          cacheable: true,
        })
        .ok_or_else(|| eyre!("no route for {}", key));
      Box::pin(async move { result })
    }
  }

  fn test_worker(
    registry: &Arc<MemorySessionRegistry>,
    detector: ClipboardLinkDetector<MemoryPendingLinkStore>,
  ) -> (
    Worker<MemoryAssetStore, MemoryPendingLinkStore>,
    WorkerHandle,
  ) {
    let fetcher = Arc::new(MapFetcher::new(&[("/index.html", "home"), ("/app.js", "js")]));
    let cache = AssetCache::new(MemoryAssetStore::default(), fetcher as _, "assets");
    let router = ShareIntakeRouter::new(
      Arc::clone(registry) as _,
      Duration::from_millis(10),
      "/",
    );
    Worker::with_parts(
      cache,
      router,
      detector,
      "v1",
      vec!["/index.html".to_string()],
    )
  }

  #[tokio::test]
  async fn test_asset_request_is_served() {
    let registry = MemorySessionRegistry::new();
    let detector =
      ClipboardLinkDetector::new(MemoryPendingLinkStore::default(), Box::new(NoClipboard));
    let (worker, handle) = test_worker(&registry, detector);
    let worker_task = tokio::spawn(worker.run());

    let response = handle
      .request(FetchRequest::parse("/index.html"))
      .await
      .expect("request");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"home");

    handle.shutdown();
    worker_task.await.expect("join").expect("run");
  }

  #[tokio::test]
  async fn test_share_request_redirects_and_delivers() {
    let registry = MemorySessionRegistry::new();
    let (_session, mut rx) = registry.connect("/").expect("connect");
    let detector =
      ClipboardLinkDetector::new(MemoryPendingLinkStore::default(), Box::new(NoClipboard));
    let (worker, handle) = test_worker(&registry, detector);
    let worker_task = tokio::spawn(worker.run());

    let response = handle
      .request(FetchRequest::parse(&format!(
        "{}?url=https%3A%2F%2Fx.example%2F1&title=Post",
        SHARE_TARGET_PATH
      )))
      .await
      .expect("request");
    assert_eq!(response.status, 303);
    assert_eq!(response.location.as_deref(), Some("/"));
    assert_eq!(
      rx.try_recv().ok(),
      Some(SessionMessage::ShareTarget {
        url: "https://x.example/1".to_string(),
        title: "Post".to_string(),
        text: String::new(),
      })
    );

    handle.shutdown();
    worker_task.await.expect("join").expect("run");
  }

  #[tokio::test]
  async fn test_clipboard_check_routes_pending_link() {
    let registry = MemorySessionRegistry::new();
    let (_session, mut rx) = registry.connect("/").expect("connect");

    let detector =
      ClipboardLinkDetector::new(MemoryPendingLinkStore::default(), Box::new(NoClipboard));
    detector
      .persist_pending("https://saved.example/article")
      .expect("persist");

    let (worker, handle) = test_worker(&registry, detector);
    let worker_task = tokio::spawn(worker.run());

    handle.clipboard_check();
    // Let the check and the immediate delivery run
    let response = handle
      .request(FetchRequest::parse("/index.html"))
      .await
      .expect("request");
    assert_eq!(response.status, 200);

    assert_eq!(
      rx.try_recv().ok(),
      Some(SessionMessage::ShareTarget {
        url: "https://saved.example/article".to_string(),
        title: String::new(),
        text: String::new(),
      })
    );

    handle.shutdown();
    worker_task.await.expect("join").expect("run");
  }
}
