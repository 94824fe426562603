//! Inbound share intake.
//!
//! A share handed to the application from outside arrives as a request on
//! the reserved share-target path. The router extracts the shared link,
//! routes it to exactly one client session, and always answers the request
//! with a redirect to the application root so the share action never appears
//! to hang or fail in the originating application, whatever happened to the
//! link itself.

mod scheduler;

pub use scheduler::DeliveryScheduler;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::clipboard::extract_url;
use crate::request::{FetchRequest, FetchResponse};
use crate::session::{SessionId, SessionMessage, SessionRegistry};

/// Reserved path for inbound share requests.
pub const SHARE_TARGET_PATH: &str = "/share-target";

/// Default grace delay before delivering to a freshly opened session.
pub const DEFAULT_GRACE_DELAY_MS: u64 = 1_000;

/// One inbound share, as extracted from the request. Lives only for the
/// duration of one intake.
#[derive(Debug, Clone, Default)]
pub struct ShareEvent {
  pub url: Option<String>,
  pub title: Option<String>,
  pub text: Option<String>,
}

impl ShareEvent {
  /// Read the share fields out of a share-target request.
  pub fn from_request(request: &FetchRequest) -> Self {
    Self {
      url: request.query_param("url").map(String::from),
      title: request.query_param("title").map(String::from),
      text: request.query_param("text").map(String::from),
    }
  }

  /// The shared link: the explicit `url` field when it is a well-formed
  /// absolute URL, else the first URL-shaped substring of `text`.
  pub fn extracted_url(&self) -> Option<String> {
    if let Some(url) = &self.url {
      if let Ok(parsed) = Url::parse(url) {
        if matches!(parsed.scheme(), "http" | "https") {
          return Some(url.clone());
        }
      }
    }

    self.text.as_deref().and_then(extract_url)
  }
}

/// How one share event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
  /// Neither field yielded a URL; nothing was delivered.
  NoUrl,
  /// Sent immediately to an already-connected session.
  Delivered,
  /// Scheduled for a freshly opened session after the grace delay.
  Scheduled,
  /// Resolution or the immediate send failed; the share is lost.
  Dropped,
}

/// Routes inbound share requests to exactly one client session.
pub struct ShareIntakeRouter {
  registry: Arc<dyn SessionRegistry>,
  scheduler: DeliveryScheduler,
  app_root: String,
}

impl ShareIntakeRouter {
  pub fn new(registry: Arc<dyn SessionRegistry>, grace_delay: Duration, app_root: &str) -> Self {
    Self {
      registry,
      scheduler: DeliveryScheduler::new(grace_delay),
      app_root: app_root.to_string(),
    }
  }

  /// Handle `request` if it targets the reserved share path.
  ///
  /// `None` means the request is not a share and passes through to normal
  /// fetch handling. A share request always produces the redirect response,
  /// regardless of extraction or delivery outcome.
  pub async fn intercept(&self, request: &FetchRequest) -> Option<FetchResponse> {
    if request.path != SHARE_TARGET_PATH {
      return None;
    }

    let event = ShareEvent::from_request(request);
    let outcome = self.route(event).await;
    debug!(?outcome, "share intake finished");

    Some(FetchResponse::see_other(&self.app_root))
  }

  /// Run one share event through extraction, session resolution and
  /// delivery. Never re-enters an earlier stage: each event is processed at
  /// most once.
  pub async fn route(&self, event: ShareEvent) -> ShareOutcome {
    let Some(url) = event.extracted_url() else {
      debug!("share carried no extractable url");
      return ShareOutcome::NoUrl;
    };

    let message = SessionMessage::ShareTarget {
      url,
      title: event.title.unwrap_or_default(),
      text: event.text.unwrap_or_default(),
    };

    let sessions = match self.registry.list_sessions() {
      Ok(sessions) => sessions,
      Err(e) => {
        warn!("failed to enumerate sessions: {}", e);
        return ShareOutcome::Dropped;
      }
    };

    // First enumerated session wins; at most one UI instance matters to the
    // user who initiated the share.
    if let Some(session) = sessions.into_iter().next() {
      session.focus();
      return match session.receive(message) {
        Ok(()) => ShareOutcome::Delivered,
        Err(e) => {
          warn!(session = session.id(), "immediate share delivery failed: {}", e);
          ShareOutcome::Dropped
        }
      };
    }

    match self.registry.open_session(&self.app_root).await {
      Ok(session) => match self.scheduler.schedule(session, message) {
        Ok(()) => ShareOutcome::Scheduled,
        Err(e) => {
          warn!("failed to schedule share delivery: {}", e);
          ShareOutcome::Dropped
        }
      },
      Err(e) => {
        warn!("failed to open a session for share delivery: {}", e);
        ShareOutcome::Dropped
      }
    }
  }

  /// Session teardown hook: cancels any delivery still pending for it.
  pub fn session_closed(&self, session_id: SessionId) {
    match self.scheduler.cancel(session_id) {
      Ok(_) => {}
      Err(e) => warn!(session = session_id, "failed to cancel pending delivery: {}", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::MemorySessionRegistry;

  fn router_with(
    registry: &Arc<MemorySessionRegistry>,
    grace: Duration,
  ) -> ShareIntakeRouter {
    ShareIntakeRouter::new(Arc::clone(registry) as _, grace, "/")
  }

  fn share_request(url: &str, title: &str, text: &str) -> FetchRequest {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
      .append_pair("url", url)
      .append_pair("title", title)
      .append_pair("text", text)
      .finish();
    FetchRequest::parse(&format!("{}?{}", SHARE_TARGET_PATH, query))
  }

  #[test]
  fn test_extracted_url_prefers_url_field() {
    let event = ShareEvent {
      url: Some("https://x.example/1".to_string()),
      title: None,
      text: Some("see https://y.example/2".to_string()),
    };
    assert_eq!(event.extracted_url(), Some("https://x.example/1".to_string()));
  }

  #[test]
  fn test_extracted_url_falls_back_to_text() {
    let event = ShareEvent {
      url: Some("not a url".to_string()),
      title: Some("Post".to_string()),
      text: Some("see https://y.example/2 later".to_string()),
    };
    assert_eq!(event.extracted_url(), Some("https://y.example/2".to_string()));
  }

  #[tokio::test]
  async fn test_non_share_request_passes_through() {
    let registry = MemorySessionRegistry::new();
    let router = router_with(&registry, Duration::from_millis(10));

    let request = FetchRequest::parse("/app.css");
    assert!(router.intercept(&request).await.is_none());
  }

  #[tokio::test]
  async fn test_share_to_open_session_is_immediate() {
    let registry = MemorySessionRegistry::new();
    let (session, mut rx) = registry.connect("/").expect("connect");
    // A long grace delay proves the immediate path does not wait
    let router = router_with(&registry, Duration::from_secs(60));

    let request = share_request("https://x.example/1", "Post", "");
    let response = router.intercept(&request).await.expect("share response");

    assert_eq!(response.status, 303);
    assert_eq!(response.location.as_deref(), Some("/"));
    assert!(session.is_focused());
    assert_eq!(
      rx.try_recv().ok(),
      Some(SessionMessage::ShareTarget {
        url: "https://x.example/1".to_string(),
        title: "Post".to_string(),
        text: String::new(),
      })
    );
  }

  #[tokio::test]
  async fn test_share_to_new_session_waits_for_grace_delay() {
    let registry = MemorySessionRegistry::new();
    let router = router_with(&registry, Duration::from_millis(40));

    let request = share_request("https://x.example/1", "", "");
    let response = router.intercept(&request).await.expect("share response");
    assert_eq!(response.status, 303);

    let sessions = registry.list_sessions().expect("list");
    assert_eq!(sessions.len(), 1);
    let mut rx = registry
      .take_inbox(sessions[0].id())
      .expect("lock")
      .expect("inbox");

    // Before the grace delay elapses nothing has been sent
    assert!(rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
      rx.try_recv().ok(),
      Some(SessionMessage::ShareTarget {
        url: "https://x.example/1".to_string(),
        title: String::new(),
        text: String::new(),
      })
    );
  }

  #[tokio::test]
  async fn test_share_without_url_redirects_and_delivers_nothing() {
    let registry = MemorySessionRegistry::new();
    let (_session, mut rx) = registry.connect("/").expect("connect");
    let router = router_with(&registry, Duration::from_millis(10));

    let request = share_request("", "Title only", "no link in this text");
    let response = router.intercept(&request).await.expect("share response");

    assert_eq!(response.status, 303);
    assert!(rx.try_recv().is_err());
    // No extra session was opened either
    assert_eq!(registry.list_sessions().expect("list").len(), 1);
  }

  #[tokio::test]
  async fn test_teardown_cancels_scheduled_delivery() {
    let registry = MemorySessionRegistry::new();
    let router = router_with(&registry, Duration::from_millis(50));

    let outcome = router
      .route(ShareEvent {
        url: Some("https://x.example/1".to_string()),
        title: None,
        text: None,
      })
      .await;
    assert_eq!(outcome, ShareOutcome::Scheduled);

    let session_id = registry.list_sessions().expect("list")[0].id();
    let mut rx = registry.take_inbox(session_id).expect("lock").expect("inbox");

    router.session_closed(session_id);
    registry.disconnect(session_id).expect("disconnect");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_text_only_share_is_delivered() {
    let registry = MemorySessionRegistry::new();
    let (_session, mut rx) = registry.connect("/").expect("connect");
    let router = router_with(&registry, Duration::from_millis(10));

    let outcome = router
      .route(ShareEvent {
        url: None,
        title: None,
        text: Some("worth saving https://y.example/post/9".to_string()),
      })
      .await;

    assert_eq!(outcome, ShareOutcome::Delivered);
    assert_eq!(
      rx.try_recv().ok(),
      Some(SessionMessage::ShareTarget {
        url: "https://y.example/post/9".to_string(),
        title: String::new(),
        text: "worth saving https://y.example/post/9".to_string(),
      })
    );
  }
}
