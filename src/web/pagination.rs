use serde::{Deserialize, Serialize};

const MAX_PAGE_SIZE: u64 = 500;

/// 1-based page selection. Requests without `index` get everything.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pagination {
    pub index: u64,
    #[serde(default = "default_size")]
    pub size: u64,
}

fn default_size() -> u64 {
    50
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            index: 1,
            size: default_size(),
        }
    }
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        self.index.saturating_sub(1).saturating_mul(self.size)
    }

    pub fn limit(&self) -> u64 {
        self.size
    }

    pub fn check(&self) -> Self {
        if self.index < 1 || self.size < 1 {
            return Self::default();
        }
        Self {
            index: self.index,
            size: self.size.min(MAX_PAGE_SIZE),
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let page = self.check();
        items
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(page.limit()).unwrap_or(usize::MAX))
            .collect()
    }
}
