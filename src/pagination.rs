//! Cursor pagination over server-paged collections.
//!
//! `CollectionFetcher` walks a collection one page at a time, strictly in cursor order, and stops
//! as soon as the caller's stop predicate is satisfied or the server runs out of pages.

use crate::cancel::CancelToken;
use crate::error::FetchError;
use serde::Deserialize;
use std::future::Future;

/// Pagination state reported by the server after each page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// A single page of a paginated collection.
pub trait Paged {
    fn page_info(&self) -> &PageInfo;
    fn is_empty(&self) -> bool;
}

pub struct CollectionFetcher<'a> {
    collection: &'static str,
    max_pages: u32,
    cancel: &'a CancelToken,
}

impl<'a> CollectionFetcher<'a> {
    pub fn new(collection: &'static str, max_pages: u32, cancel: &'a CancelToken) -> Self {
        Self {
            collection,
            max_pages,
            cancel,
        }
    }

    /// Fetches pages until one of the stop conditions holds and returns them in order.
    ///
    /// `fetch_page` receives the cursor of the page to load (`None` for the first one).
    /// `should_stop` is evaluated on every non-empty page after it has been kept.
    /// An empty page ends the walk without being kept or inspected.
    ///
    /// Any error, cancellation included, discards the pages gathered so far.
    pub async fn fetch_all<P, F, Fut, S>(
        &self,
        mut fetch_page: F,
        should_stop: S,
    ) -> Result<Vec<P>, FetchError>
    where
        P: Paged,
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<P, FetchError>>,
        S: Fn(&P) -> bool,
    {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page_number = pages.len() + 1;
            tracing::debug!(collection = self.collection, page = page_number, "Requesting page");

            let page = self.cancel.run(fetch_page(cursor.take())).await?;

            if page.is_empty() {
                tracing::debug!(collection = self.collection, page = page_number, "Empty page");
                break;
            }

            let stop = should_stop(&page);
            let info = page.page_info().clone();
            pages.push(page);

            if stop || !info.has_next_page {
                break;
            }

            if pages.len() >= self.max_pages as usize {
                tracing::warn!(
                    collection = self.collection,
                    "Hit max_github_api_pages ({}) before reaching the lower bound. Data may be incomplete.",
                    self.max_pages
                );
                break;
            }

            match info.end_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    tracing::warn!(
                        collection = self.collection,
                        "Server reported another page without an end cursor"
                    );
                    break;
                }
            }
        }

        tracing::debug!(collection = self.collection, pages = pages.len(), "Collection fetched");
        Ok(pages)
    }
}
