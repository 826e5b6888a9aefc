use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// A single page of a larger listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

impl<T> Page<T> {
    /// Cut page `page` (1-based) of `size` items out of `all`.
    ///
    /// `page` is clamped to at least 1 and `size` to `1..=MAX_PAGE_SIZE`.
    /// A page past the end yields no items but still reports the total.
    pub fn paginate(all: Vec<T>, page: usize, size: usize) -> Self {
        let page = page.max(1);
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(size))
            .take(size)
            .collect();
        Self {
            items,
            total,
            page,
            size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            size: self.size,
        }
    }
}
