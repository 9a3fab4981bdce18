//! Pagination for list queries.

use serde::{Deserialize, Serialize};

/// Requested page, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Fill in defaults: page 1, `default_limit` when zero, capped at `max_limit`.
    pub fn normalised(self, default_limit: u32, max_limit: u32) -> Self {
        let page = self.page.max(1);
        let limit = match self.limit {
            0 => default_limit,
            l => l.min(max_limit),
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page.max(1)) - 1) * i64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> i64 {
        if self.limit == 0 {
            return 0;
        }
        (self.total + i64::from(self.limit) - 1) / i64::from(self.limit)
    }
}
