//! Pagination shared by server-side queries and in-memory views

use serde::{Deserialize, Serialize};

/// Page size used by every list view
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Page links shown around the current page
pub const PAGE_WINDOW: u32 = 5;

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, crate::query::MAX_LIMIT),
        }
    }

    /// Records to skip: `(page - 1) * per_page`
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

/// One page of a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: u64, params: PageRequest) -> Self {
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        }
    }

    /// Slice an in-memory list. Pages past the end are empty.
    pub fn paginate(all: Vec<T>, params: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.per_page as usize)
            .collect();
        Self::new(items, total, params)
    }

    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        self.total
            .div_ceil(self.per_page as u64)
            .min(u32::MAX as u64) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn is_last(&self) -> bool {
        self.page >= self.total_pages()
    }

    /// Page numbers to show as links, at most [`PAGE_WINDOW`] centred on the
    /// current page. A page past the end shows the last window.
    pub fn page_window(&self) -> std::ops::RangeInclusive<u32> {
        let total = self.total_pages();
        if total == 0 {
            return 1..=0;
        }
        let current = self.page.clamp(1, total);
        let start = current.saturating_sub(PAGE_WINDOW / 2).max(1);
        let end = start.saturating_add(PAGE_WINDOW - 1).min(total);
        // Near the last page the window grows backwards instead
        let start = end.saturating_sub(PAGE_WINDOW - 1).max(1).min(start);
        start..=end
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_forty_five_records_in_pages_of_twenty() {
        let all: Vec<u32> = (1..=45).collect();
        let page = PagedResult::paginate(all, PageRequest::new(3, 20));

        assert_eq!(page.items, (41..=45).collect::<Vec<_>>());
        assert_eq!(page.total_pages(), 3);
        assert!(page.is_last());
        assert!(!page.has_next());
        assert!(page.has_prev());
    }

    #[test]
    fn test_out_of_range_page_is_empty() {
        let page = PagedResult::paginate(vec![1, 2, 3], PageRequest::new(5, 20));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_request_normalization() {
        let params = PageRequest::new(0, 0);
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 1);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        assert_eq!(PageRequest::new(1, 5000).per_page, 1000);
    }

    #[test]
    fn test_page_window() {
        let page = |n: u32, total: u64| PagedResult::<()>::new(vec![], total, PageRequest::new(n, 10));
        assert_eq!(page(1, 100).page_window(), 1..=5);
        assert_eq!(page(6, 100).page_window(), 4..=8);
        assert_eq!(page(10, 100).page_window(), 6..=10);
        assert_eq!(page(2, 30).page_window(), 1..=3);
        assert!(page(1, 0).page_window().is_empty());
        assert_eq!(page(50, 100).page_window(), 6..=10);
    }

    #[test]
    fn test_page_window_at_the_numeric_limit() {
        let params = PageRequest::new(u32::MAX, 1);
        let last = PagedResult::<()>::new(vec![], u32::MAX as u64, params);
        assert_eq!(last.page_window(), u32::MAX - 4..=u32::MAX);

        let beyond = PagedResult::<()>::new(vec![], u64::MAX, params);
        assert_eq!(beyond.total_pages(), u32::MAX);
        assert_eq!(beyond.page_window(), u32::MAX - 4..=u32::MAX);
    }

    proptest! {
        #[test]
        fn prop_page_window_stays_in_range(page in any::<u32>(), total in 1u64..=u32::MAX as u64) {
            let result = PagedResult::<()>::new(vec![], total, PageRequest::new(page, 1));
            let window = result.page_window();
            prop_assert!(*window.start() >= 1);
            prop_assert!(*window.end() <= result.total_pages());
            prop_assert!(window.clone().count() as u32 <= PAGE_WINDOW);
            prop_assert!(window.count() as u64 == total.min(PAGE_WINDOW as u64));
        }
    }

    proptest! {
        #[test]
        fn prop_pages_cover_every_item_once(len in 0usize..200, per_page in 1u32..50) {
            let all: Vec<usize> = (0..len).collect();
            let pages = PagedResult::paginate(all.clone(), PageRequest::new(1, per_page)).total_pages();
            let mut seen = Vec::new();
            for n in 1..=pages.max(1) {
                seen.extend(PagedResult::paginate(all.clone(), PageRequest::new(n, per_page)).items);
            }
            prop_assert_eq!(seen, all);
        }
    }
}
