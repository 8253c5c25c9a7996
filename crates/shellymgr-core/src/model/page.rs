// ── Pagination ──

use serde::{Deserialize, Serialize};

/// Page request. Pages are 1-based; a zero `page_size` falls back to the
/// default of 50.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

impl PageRequest {
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: if self.page_size == 0 { 50 } else { self.page_size },
        }
    }

    pub fn offset(self) -> u32 {
        let norm = self.normalized();
        (norm.page - 1) * norm.page_size
    }
}

/// Page metadata returned alongside every listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    pub fn new(request: PageRequest, total_items: u64) -> Self {
        let request = request.normalized();
        let total_pages = total_items.div_ceil(u64::from(request.page_size)).max(1) as u32;
        Self {
            page: request.page,
            page_size: request.page_size,
            total_items,
            total_pages,
            has_next: request.page < total_pages,
            has_prev: request.page > 1,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_computes_boundaries() {
        let meta = PageMeta::new(PageRequest { page: 2, page_size: 10 }, 25);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next);
        assert!(meta.has_prev);

        let last = PageMeta::new(PageRequest { page: 3, page_size: 10 }, 25);
        assert!(!last.has_next);
    }

    #[test]
    fn empty_listing_still_has_one_page() {
        let meta = PageMeta::new(PageRequest::default(), 0);
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_next);
        assert!(!meta.has_prev);
    }
}
