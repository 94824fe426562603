//! Client session contracts and the channel-backed registry.
//!
//! A session is one connected UI instance. The worker never owns session
//! lifecycles; it looks them up through a [`SessionRegistry`] and talks to
//! them through the narrow [`ClientSession`] capability (focus + receive).

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Identifier for a connected session, unique per registry.
pub type SessionId = u64;

/// Boxed future used by registry async methods.
pub type SessionFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Message delivered to exactly one client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SessionMessage {
  /// An inbound share handed to the UI for bookmarking.
  #[serde(rename = "share-target")]
  ShareTarget {
    url: String,
    title: String,
    text: String,
  },
}

/// A connected UI instance capable of being focused and receiving messages.
pub trait ClientSession: Send + Sync {
  /// Registry-unique identifier, used to key scheduled deliveries.
  fn id(&self) -> SessionId;

  /// Bring this session to the foreground.
  fn focus(&self);

  /// Deliver a message to this session.
  ///
  /// # Errors
  ///
  /// Returns an error when the session is no longer reachable.
  fn receive(&self, message: SessionMessage) -> Result<()>;
}

/// Enumerates connected sessions and opens new ones.
///
/// Ordering of `list_sessions` is runtime-defined; callers treat only the
/// first element as significant.
pub trait SessionRegistry: Send + Sync {
  /// Currently connected sessions, including ones not visible to the user.
  fn list_sessions(&self) -> Result<Vec<Arc<dyn ClientSession>>>;

  /// Open a new session navigated to `url`.
  ///
  /// Resolves once the session handle exists, not once the session has
  /// finished initializing.
  fn open_session(&self, url: &str) -> SessionFuture<Result<Arc<dyn ClientSession>>>;
}

/// Session backed by an unbounded channel into the UI instance.
pub struct ChannelSession {
  id: SessionId,
  navigated_to: String,
  focused: AtomicBool,
  tx: mpsc::UnboundedSender<SessionMessage>,
}

impl ChannelSession {
  /// URL the session was opened at.
  #[allow(dead_code)]
  pub fn navigated_to(&self) -> &str {
    &self.navigated_to
  }

  /// Whether `focus` has been called on this session.
  #[allow(dead_code)]
  pub fn is_focused(&self) -> bool {
    self.focused.load(Ordering::SeqCst)
  }
}

impl ClientSession for ChannelSession {
  fn id(&self) -> SessionId {
    self.id
  }

  fn focus(&self) {
    self.focused.store(true, Ordering::SeqCst);
  }

  fn receive(&self, message: SessionMessage) -> Result<()> {
    self
      .tx
      .send(message)
      .map_err(|_| eyre!("session {} is no longer connected", self.id))
  }
}

#[derive(Default)]
struct RegistryInner {
  next_id: SessionId,
  sessions: Vec<Arc<ChannelSession>>,
  /// Inboxes of sessions created through `open_session`, until the runtime
  /// (or a test) claims them with `take_inbox`.
  unclaimed_inboxes: HashMap<SessionId, mpsc::UnboundedReceiver<SessionMessage>>,
}

/// In-process registry of channel-backed sessions.
///
/// Used by tests and by the daemon's local wiring; a real multi-process
/// runtime would provide its own [`SessionRegistry`] implementation.
#[derive(Default)]
pub struct MemorySessionRegistry {
  inner: Mutex<RegistryInner>,
}

impl MemorySessionRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Connect a new session and hand its inbox straight to the caller.
  #[allow(dead_code)]
  pub fn connect(
    &self,
    url: &str,
  ) -> Result<(Arc<ChannelSession>, mpsc::UnboundedReceiver<SessionMessage>)> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let id = inner.next_id;
    inner.next_id += 1;

    let session = Arc::new(ChannelSession {
      id,
      navigated_to: url.to_string(),
      focused: AtomicBool::new(false),
      tx,
    });
    inner.sessions.push(Arc::clone(&session));

    Ok((session, rx))
  }

  /// Claim the inbox of a session created through `open_session`.
  #[allow(dead_code)]
  pub fn take_inbox(
    &self,
    id: SessionId,
  ) -> Result<Option<mpsc::UnboundedReceiver<SessionMessage>>> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.unclaimed_inboxes.remove(&id))
  }

  /// Remove a session from the registry (UI instance closed).
  #[allow(dead_code)]
  pub fn disconnect(&self, id: SessionId) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.sessions.retain(|s| s.id != id);
    inner.unclaimed_inboxes.remove(&id);
    Ok(())
  }
}

impl SessionRegistry for MemorySessionRegistry {
  fn list_sessions(&self) -> Result<Vec<Arc<dyn ClientSession>>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .sessions
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn ClientSession>)
        .collect(),
    )
  }

  fn open_session(&self, url: &str) -> SessionFuture<Result<Arc<dyn ClientSession>>> {
    let result = self.connect(url).and_then(|(session, rx)| {
      let mut inner = self
        .inner
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      inner.unclaimed_inboxes.insert(session.id(), rx);
      Ok(session as Arc<dyn ClientSession>)
    });
    Box::pin(async move { result })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_message_wire_shape() {
    let message = SessionMessage::ShareTarget {
      url: "https://x.example/1".to_string(),
      title: "Post".to_string(),
      text: String::new(),
    };
    let json = serde_json::to_value(&message).expect("serialize");
    assert_eq!(
      json,
      serde_json::json!({
        "kind": "share-target",
        "url": "https://x.example/1",
        "title": "Post",
        "text": "",
      })
    );
  }

  #[test]
  fn test_connect_and_receive() {
    let registry = MemorySessionRegistry::new();
    let (session, mut rx) = registry.connect("/").expect("connect");

    let message = SessionMessage::ShareTarget {
      url: "https://a.example/x".to_string(),
      title: String::new(),
      text: String::new(),
    };
    session.receive(message.clone()).expect("receive");
    assert_eq!(rx.try_recv().ok(), Some(message));
  }

  #[test]
  fn test_receive_after_inbox_dropped_is_error() {
    let registry = MemorySessionRegistry::new();
    let (session, rx) = registry.connect("/").expect("connect");
    drop(rx);

    let result = session.receive(SessionMessage::ShareTarget {
      url: "https://a.example/x".to_string(),
      title: String::new(),
      text: String::new(),
    });
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_open_session_registers_and_keeps_inbox() {
    let registry = MemorySessionRegistry::new();
    assert!(registry.list_sessions().expect("list").is_empty());

    let session = registry.open_session("/").await.expect("open");
    assert_eq!(registry.list_sessions().expect("list").len(), 1);

    let mut rx = registry
      .take_inbox(session.id())
      .expect("lock")
      .expect("inbox present");
    session
      .receive(SessionMessage::ShareTarget {
        url: "https://a.example/x".to_string(),
        title: String::new(),
        text: String::new(),
      })
      .expect("receive");
    assert!(rx.try_recv().is_ok());
  }

  #[test]
  fn test_disconnect_removes_session() {
    let registry = MemorySessionRegistry::new();
    let (session, _rx) = registry.connect("/").expect("connect");
    registry.disconnect(session.id()).expect("disconnect");
    assert!(registry.list_sessions().expect("list").is_empty());
  }
}
