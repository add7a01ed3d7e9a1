use std::future::Future;

use futures_util::{Stream, StreamExt};

use crate::error::Result;

/// One page of a cursor-based listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub next_token: Option<String>,
}

impl<T> Page<T> {
  pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
    // Some backends send an empty token on the last page.
    let next_token = next_token.filter(|token| !token.is_empty());
    Page { items, next_token }
  }
}

/// Follows continuation tokens until the backend reports no further pages and
/// returns every item in backend order. Any page error aborts the drain; no
/// partial listing is ever returned.
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
  F: FnMut(Option<String>) -> Fut,
  Fut: Future<Output = Result<Page<T>>>,
{
  let mut items = Vec::new();
  let mut token = None;
  let mut pages = 0usize;
  loop {
    let page = fetch(token.take()).await?;
    pages += 1;
    items.extend(page.items);
    match page.next_token {
      Some(next) => token = Some(next),
      None => break,
    }
  }
  tracing::debug!(pages, items = items.len(), "drained listing");
  Ok(items)
}

/// Drains a client-side page stream, for SDKs that hide the cursor behind a
/// stream of pages. The first failed page aborts the drain.
pub async fn drain_stream<S, P, T, E, F>(mut pages: S, mut items_of: F) -> Result<Vec<T>, E>
where
  S: Stream<Item = Result<P, E>> + Unpin,
  F: FnMut(P) -> Vec<T>,
{
  let mut items = Vec::new();
  while let Some(page) = pages.next().await {
    items.extend(items_of(page?));
  }
  Ok(items)
}

/// Walks a page stream until some page holds an item. Empty pages that carry a
/// continuation are skipped, so `false` means the listing was exhausted.
pub async fn any_item<S, P, E, F>(mut pages: S, mut has_items: F) -> Result<bool, E>
where
  S: Stream<Item = Result<P, E>> + Unpin,
  F: FnMut(&P) -> bool,
{
  let mut pages_seen = 0usize;
  while let Some(page) = pages.next().await {
    pages_seen += 1;
    if has_items(&page?) {
      return Ok(true);
    }
  }
  tracing::debug!(pages = pages_seen, "listing exhausted without items");
  Ok(false)
}
