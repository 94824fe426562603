//! Grace-delay delivery tasks, cancellable per session.
//!
//! A freshly opened session needs time to initialize before it can receive
//! messages, so delivery to one is scheduled after a fixed grace delay.
//! There is no acknowledgment and no retry; a session that is gone when the
//! timer fires loses the message. Teardown turns a pending send into an
//! observable, logged cancellation instead of a silent drop.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::session::{ClientSession, SessionId, SessionMessage};

/// Schedules one pending delivery per session.
pub struct DeliveryScheduler {
  grace_delay: Duration,
  tasks: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl DeliveryScheduler {
  pub fn new(grace_delay: Duration) -> Self {
    Self {
      grace_delay,
      tasks: Mutex::new(HashMap::new()),
    }
  }

  /// Schedule `message` for `session` after the grace delay.
  ///
  /// Only the most recent share matters, so a delivery already pending for
  /// the same session is aborted and replaced.
  pub fn schedule(&self, session: Arc<dyn ClientSession>, message: SessionMessage) -> Result<()> {
    let session_id = session.id();
    let delay = self.grace_delay;

    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if let Err(e) = session.receive(message) {
        warn!(session = session_id, "scheduled share delivery dropped: {}", e);
      }
    });

    let mut tasks = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    tasks.retain(|_, task| !task.is_finished());
    if let Some(previous) = tasks.insert(session_id, handle) {
      previous.abort();
      info!(session = session_id, "replaced pending share delivery");
    }

    Ok(())
  }

  /// Cancel any pending delivery for a session that is being torn down.
  ///
  /// Returns whether a pending delivery was actually cancelled.
  pub fn cancel(&self, session_id: SessionId) -> Result<bool> {
    let mut tasks = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(task) = tasks.remove(&session_id) {
      if !task.is_finished() {
        task.abort();
        info!(session = session_id, "cancelled pending share delivery");
        return Ok(true);
      }
    }

    Ok(false)
  }
}
