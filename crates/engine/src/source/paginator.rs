//! Page arithmetic.

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Request parameter carrying the page number.
pub const DEFAULT_PAGE_PARAM: &str = "page";

/// Where a page sits in the full result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Current page number (1-indexed).
    pub page: u32,

    /// Items per page.
    pub per_page: u32,

    /// Total count (before paging).
    pub total: u64,

    /// Total number of pages.
    pub total_pages: u32,

    /// Rows skipped before this page.
    pub offset: u64,

    /// Whether there's a next page.
    pub has_next: bool,

    /// Whether there's a previous page.
    pub has_prev: bool,
}

impl PageInfo {
    /// Create paging info. Pages past the end clamp to the last page.
    pub fn new(total: u64, page: u32, per_page: u32) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total.div_ceil(u64::from(per_page));
        let total_pages = u32::try_from(total_pages).unwrap_or(u32::MAX);
        let page = page.max(1).min(total_pages.max(1));

        Self {
            page,
            per_page,
            total,
            total_pages,
            offset: u64::from(page - 1) * u64::from(per_page),
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// Splits a result into pages. Holds no query state: the total comes from a
/// count callback supplied per call.
#[derive(Debug, Clone)]
pub struct Paginator {
    per_page: u32,
    param_name: String,
}

impl Paginator {
    pub fn new(per_page: u32, param_name: impl Into<String>) -> Self {
        Self {
            per_page: per_page.max(1),
            param_name: param_name.into(),
        }
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    /// Page requested in `params`, defaulting to 1.
    pub fn requested_page(&self, params: &HashMap<String, String>) -> u32 {
        params
            .get(&self.param_name)
            .and_then(|v| v.trim().parse().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1)
    }

    /// Compute paging info, calling `count` once for the total.
    pub async fn paginate<F, Fut>(&self, page: u32, count: F) -> EngineResult<PageInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<u64>>,
    {
        let total = count().await?;
        Ok(PageInfo::new(total, page, self.per_page))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn page_info_paging() {
        let info = PageInfo::new(25, 2, 10);
        assert_eq!(info.total_pages, 3);
        assert_eq!(info.offset, 10);
        assert!(info.has_next);
        assert!(info.has_prev);
    }

    #[test]
    fn page_info_last_page() {
        let info = PageInfo::new(25, 3, 10);
        assert!(!info.has_next);
        assert!(info.has_prev);
        assert_eq!(info.offset, 20);
    }

    #[test]
    fn out_of_range_page_clamps() {
        let info = PageInfo::new(25, 9, 10);
        assert_eq!(info.page, 3);
        assert_eq!(info.offset, 20);

        let zero = PageInfo::new(25, 0, 10);
        assert_eq!(zero.page, 1);
    }

    #[test]
    fn empty_result_is_page_one_of_zero() {
        let info = PageInfo::new(0, 4, 10);
        assert_eq!(info.page, 1);
        assert_eq!(info.total_pages, 0);
        assert_eq!(info.offset, 0);
        assert!(!info.has_next);
        assert!(!info.has_prev);
    }

    #[test]
    fn requested_page_from_params() {
        let p = Paginator::new(10, "p");
        let mut params = HashMap::new();
        assert_eq!(p.requested_page(&params), 1);
        params.insert("p".to_string(), "3".to_string());
        assert_eq!(p.requested_page(&params), 3);
        params.insert("p".to_string(), "zero".to_string());
        assert_eq!(p.requested_page(&params), 1);
    }

    #[tokio::test]
    async fn paginate_calls_count_once() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let p = Paginator::new(2, DEFAULT_PAGE_PARAM);
        let info = p
            .paginate(2, || async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(5)
            })
            .await
            .unwrap();
        assert_eq!(info.total_pages, 3);
        assert_eq!(info.offset, 2);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
