//! Clipboard-based share fallback.
//!
//! On platforms without a push-based share mechanism, a link sitting in the
//! clipboard is the next best signal. The detector persists at most one
//! pending link, treats records older than a maximum age as absent, and
//! rate-limits checks with a cooldown because its callers are UI focus and
//! visibility events that fire in bursts.

mod reader;
mod store;

pub use reader::{ClipboardReader, NoClipboard, SystemClipboard};
pub use store::{MemoryPendingLinkStore, PendingLink, PendingLinkStore, SqlitePendingLinkStore};

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Minimum interval between executed clipboard checks.
pub const DEFAULT_COOLDOWN_MS: u64 = 2_000;
/// Age beyond which a pending record is treated as absent.
pub const DEFAULT_MAX_AGE_MS: u64 = 300_000;

/// Outcome of a single `check_and_deliver` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
  /// Called again within the cooldown window; nothing was checked.
  Skipped,
  /// Checked, but neither the pending record nor the clipboard held a link.
  NoLink,
  /// A link was handed to the delivery callback.
  Delivered,
}

/// Millisecond clock, injectable for tests.
type NowMs = Box<dyn Fn() -> u64 + Send + Sync>;

fn system_now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

/// Detects a shareable link in the clipboard and delivers it exactly once.
pub struct ClipboardLinkDetector<S: PendingLinkStore> {
  store: S,
  reader: Box<dyn ClipboardReader>,
  cooldown_ms: u64,
  max_age_ms: u64,
  /// Timestamp of the last *executed* check; skipped calls leave it alone.
  last_check_ms: Mutex<Option<u64>>,
  now_ms: NowMs,
}

impl<S: PendingLinkStore> ClipboardLinkDetector<S> {
  /// Create a detector over `store`, reading the clipboard through `reader`.
  pub fn new(store: S, reader: Box<dyn ClipboardReader>) -> Self {
    Self {
      store,
      reader,
      cooldown_ms: DEFAULT_COOLDOWN_MS,
      max_age_ms: DEFAULT_MAX_AGE_MS,
      last_check_ms: Mutex::new(None),
      now_ms: Box::new(system_now_ms),
    }
  }

  /// Set the cooldown between executed checks.
  pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
    self.cooldown_ms = cooldown_ms;
    self
  }

  /// Set the maximum age of a pending record.
  pub fn with_max_age_ms(mut self, max_age_ms: u64) -> Self {
    self.max_age_ms = max_age_ms;
    self
  }

  /// Replace the clock (tests).
  #[cfg(test)]
  fn with_clock(mut self, now_ms: NowMs) -> Self {
    self.now_ms = now_ms;
    self
  }

  /// Overwrite the pending record with `url` captured now. Idempotent.
  ///
  /// Called by the UI layer when it stashes a link for the next check.
  #[allow(dead_code)]
  pub fn persist_pending(&self, url: &str) -> Result<()> {
    self.store.set(&PendingLink {
      url: url.to_string(),
      captured_at_ms: (self.now_ms)(),
    })
  }

  /// The pending URL, if one exists and is still within the age window.
  ///
  /// An expired record is purged and reported absent: a link copied recently
  /// is still relevant, an old one is not.
  pub fn read_pending(&self) -> Result<Option<String>> {
    let Some(link) = self.store.get()? else {
      return Ok(None);
    };

    let age = (self.now_ms)().saturating_sub(link.captured_at_ms);
    if age > self.max_age_ms {
      self.store.clear()?;
      return Ok(None);
    }

    Ok(Some(link.url))
  }

  /// Remove the pending record after a successful hand-off.
  pub fn clear_pending(&self) -> Result<()> {
    self.store.clear()
  }

  /// Run one cooldown-guarded check, handing a found link to `deliver`.
  ///
  /// Looks at the pending record first, then at live clipboard text. The
  /// record is cleared after delivery so the same link is never handed over
  /// twice.
  pub fn check_and_deliver<F>(&self, deliver: F) -> Result<CheckOutcome>
  where
    F: FnOnce(&str),
  {
    let now = (self.now_ms)();
    {
      let mut last = self
        .last_check_ms
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      if let Some(last_check) = *last {
        if now.saturating_sub(last_check) < self.cooldown_ms {
          return Ok(CheckOutcome::Skipped);
        }
      }
      *last = Some(now);
    }

    let url = match self.read_pending()? {
      Some(url) => Some(url),
      None => self
        .reader
        .read_text()
        .and_then(|text| extract_url(&text)),
    };

    match url {
      Some(url) => {
        deliver(&url);
        self.clear_pending()?;
        Ok(CheckOutcome::Delivered)
      }
      None => Ok(CheckOutcome::NoLink),
    }
  }
}

/// First absolute-URL-shaped substring of `text`, or `None`.
///
/// Pure function; candidates are whitespace-bounded tokens starting with an
/// http(s) scheme, validated by a real URL parse.
pub fn extract_url(text: &str) -> Option<String> {
  let mut search_from = 0;
  while let Some(offset) = earliest_scheme(&text[search_from..]) {
    let start = search_from + offset;
    let token = text[start..]
      .split_whitespace()
      .next()
      .unwrap_or_default();

    if let Ok(parsed) = Url::parse(token) {
      if matches!(parsed.scheme(), "http" | "https") {
        return Some(token.to_string());
      }
    }

    search_from = start + 1;
  }
  None
}

/// Byte offset of the earliest http(s) scheme in `text`.
fn earliest_scheme(text: &str) -> Option<usize> {
  match (text.find("http://"), text.find("https://")) {
    (Some(a), Some(b)) => Some(a.min(b)),
    (Some(a), None) => Some(a),
    (None, Some(b)) => Some(b),
    (None, None) => None,
  }
}
