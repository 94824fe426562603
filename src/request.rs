//! Request and response model for the worker's fetch boundary.
//!
//! The runtime that dispatches real network requests into the worker is an
//! external collaborator; these types are the contract it speaks. A request
//! is an origin-relative path plus decoded query pairs, a response is status
//! plus a couple of headers plus raw bytes.

/// An inbound fetch request, already scoped to the application origin.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  /// Origin-relative path, always with a leading slash.
  pub path: String,
  /// Decoded query parameters in request order.
  pub query: Vec<(String, String)>,
}

impl FetchRequest {
  /// Build a request from an origin-relative target like `/share?url=...`.
  ///
  /// The fragment (if any) is dropped; the query string is percent-decoded.
  pub fn parse(target: &str) -> Self {
    let target = target.split('#').next().unwrap_or(target);
    let (path, query_str) = match target.split_once('?') {
      Some((p, q)) => (p, q),
      None => (target, ""),
    };

    let path = if path.starts_with('/') {
      path.to_string()
    } else {
      format!("/{}", path)
    };

    let query = url::form_urlencoded::parse(query_str.as_bytes())
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();

    Self { path, query }
  }

  /// First value for a query parameter, if present.
  pub fn query_param(&self, name: &str) -> Option<&str> {
    self
      .query
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }
}

/// A response handed back to the dispatching runtime.
#[derive(Debug, Clone)]
pub struct FetchResponse {
  pub status: u16,
  pub content_type: Option<String>,
  /// `Location` header for redirect responses.
  pub location: Option<String>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  /// A `303 See Other` redirect with an empty body.
  pub fn see_other(location: impl Into<String>) -> Self {
    Self {
      status: 303,
      content_type: None,
      location: Some(location.into()),
      body: Vec::new(),
    }
  }

  /// Whether the status is in the 2xx range.
  #[allow(dead_code)]
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_path_and_query() {
    let req = FetchRequest::parse("/share?url=https%3A%2F%2Fx.example%2F1&title=Post&text=");
    assert_eq!(req.path, "/share");
    assert_eq!(req.query_param("url"), Some("https://x.example/1"));
    assert_eq!(req.query_param("title"), Some("Post"));
    assert_eq!(req.query_param("text"), Some(""));
    assert_eq!(req.query_param("missing"), None);
  }

  #[test]
  fn test_parse_bare_path() {
    let req = FetchRequest::parse("/app.css");
    assert_eq!(req.path, "/app.css");
    assert!(req.query.is_empty());
  }

  #[test]
  fn test_parse_adds_leading_slash_and_drops_fragment() {
    let req = FetchRequest::parse("index.html#section");
    assert_eq!(req.path, "/index.html");
  }

  #[test]
  fn test_see_other() {
    let resp = FetchResponse::see_other("/");
    assert_eq!(resp.status, 303);
    assert_eq!(resp.location.as_deref(), Some("/"));
    assert!(resp.body.is_empty());
    assert!(!resp.is_success());
  }
}
