//! HTTP handler modules for pvw-api.

pub mod jobs;
pub mod scanning;
pub mod system;
pub mod uploads;

use serde::Deserialize;

use pvw_core::defaults;

/// `limit` / `offset` query parameters shared by the list endpoints.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// Limit clamped to `1..=PAGE_LIMIT_MAX` (default `PAGE_LIMIT`), offset
    /// floored at zero.
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(defaults::PAGE_LIMIT)
            .clamp(1, defaults::PAGE_LIMIT_MAX);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_resolve() {
        assert_eq!(Pagination::default().resolve(), (defaults::PAGE_LIMIT, 0));
        let page = Pagination {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(page.resolve(), (defaults::PAGE_LIMIT_MAX, 0));
        let page = Pagination {
            limit: Some(0),
            offset: Some(20),
        };
        assert_eq!(page.resolve(), (1, 20));
    }
}
