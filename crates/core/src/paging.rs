//! Offset pagination for read queries.

use serde::{Deserialize, Serialize};

/// Upper bound on a single page.
pub const MAX_PAGE_LIMIT: u32 = 500;

const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Cut one page out of an already filtered and ordered row set.
    pub fn slice<T>(self, rows: Vec<T>) -> Page<T> {
        let total = rows.len() as u64;
        let items: Vec<T> = rows
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page::new(items, total, self)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of rows matching the filter (across all pages).
    pub total: u64,
    pub page: PageRequest,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: PageRequest) -> Self {
        let has_more = total > u64::from(page.offset) + items.len() as u64;
        Self {
            items,
            total,
            page,
            has_more,
        }
    }
}
