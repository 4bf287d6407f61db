//! Cursor pagination types for list endpoints.
//!
//! Listings are newest-first; the cursor is the id of the last item on the
//! previous page. Entry ids are UUID v7, so id order is creation order.

use serde::{Deserialize, Serialize};

/// Maximum page size accepted from clients.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Default page size when the client does not specify one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// A validated page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageLimit(u32);

impl PageLimit {
    /// Clamps a requested limit into `1..=MAX_PAGE_LIMIT`.
    #[must_use]
    pub fn clamp(requested: Option<u32>) -> Self {
        let limit = requested.unwrap_or(DEFAULT_PAGE_LIMIT);
        Self(limit.clamp(1, MAX_PAGE_LIMIT))
    }

    /// Returns the inner value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for PageLimit {
    fn default() -> Self {
        Self(DEFAULT_PAGE_LIMIT)
    }
}

/// One page of results plus the cursor for the next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorPage<T> {
    /// Items on this page, newest first.
    pub items: Vec<T>,
    /// Cursor to pass for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    /// Builds a page, deriving the next cursor from the last item when the
    /// page is full.
    #[must_use]
    pub fn new(items: Vec<T>, limit: PageLimit, cursor_of: impl Fn(&T) -> String) -> Self {
        let next_cursor = if items.len() as u32 >= limit.get() {
            items.last().map(&cursor_of)
        } else {
            None
        };
        Self { items, next_cursor }
    }
}
