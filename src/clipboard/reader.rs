//! Clipboard read capability.

/// Optional platform capability to read current clipboard text.
///
/// Absence of the capability or a denied read is `None`, never an error;
/// the detector built on top is a best-effort fallback.
pub trait ClipboardReader: Send + Sync {
  fn read_text(&self) -> Option<String>;
}

/// Reader backed by the system clipboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClipboard;

impl ClipboardReader for SystemClipboard {
  fn read_text(&self) -> Option<String> {
    // A handle is opened per read; acquisition failure means the platform
    // has no usable clipboard here.
    arboard::Clipboard::new()
      .ok()
      .and_then(|mut clipboard| clipboard.get_text().ok())
  }
}

/// Reader for platforms without any clipboard access.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClipboard;

impl ClipboardReader for NoClipboard {
  fn read_text(&self) -> Option<String> {
    None
  }
}
