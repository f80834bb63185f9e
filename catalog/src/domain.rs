use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique product identifier. Immutable once assigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Caller-supplied product fields. Version and timestamps belong to the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProductId>,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
}

impl ProductDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub description: String,
    pub price: f64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: ProductId, draft: ProductDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            category: draft.category,
            description: draft.description,
            price: draft.price,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full replacement of the descriptive fields, keeping identity and
    /// creation time.
    pub fn replaced_with(&self, draft: ProductDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            name: draft.name,
            category: draft.category,
            description: draft.description,
            price: draft.price,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: now,
        }
    }

    /// True when every token occurs (case-insensitively) in the name,
    /// category or description. An empty token list matches everything.
    pub fn matches(&self, tokens: &[String]) -> bool {
        if tokens.is_empty() {
            return true;
        }
        let haystack = format!("{} {} {}", self.name, self.category, self.description).to_lowercase();
        tokens.iter().all(|token| haystack.contains(token.as_str()))
    }
}

/// Splits a free-text filter into lowercase search tokens.
pub fn search_tokens(filter: &str) -> Vec<String> {
    filter
        .split_whitespace()
        .map(|token| token.to_lowercase())
        .collect()
}

/// Stateless page request, recomputed per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    size: u32,
}

impl Pagination {
    pub const DEFAULT_SIZE: u32 = 10;
    pub const MAX_SIZE: u32 = 100;

    /// Missing or zero values fall back to page 1 and the default size;
    /// oversized pages are clamped.
    pub fn new(page: Option<u32>, size: Option<u32>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let size = size
            .filter(|s| *s > 0)
            .unwrap_or(Self::DEFAULT_SIZE)
            .min(Self::MAX_SIZE);
        Self { page, size }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.size as usize
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.size as u64)
    }

    pub fn has_more(&self, total: u64) -> bool {
        (self.page as u64) < self.total_pages(total)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductsList {
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
    pub size: u32,
    pub has_more: bool,
    pub products: Vec<Product>,
}

impl ProductsList {
    pub fn new(products: Vec<Product>, total_count: u64, pagination: &Pagination) -> Self {
        Self {
            total_count,
            total_pages: pagination.total_pages(total_count),
            page: pagination.page(),
            size: pagination.size(),
            has_more: pagination.has_more(total_count),
            products,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamping() {
        let default = Pagination::new(None, None);
        assert_eq!(default.page(), 1);
        assert_eq!(default.size(), Pagination::DEFAULT_SIZE);
        assert_eq!(default.offset(), 0);

        let zeroed = Pagination::new(Some(0), Some(0));
        assert_eq!(zeroed, default);

        let clamped = Pagination::new(Some(3), Some(1000));
        assert_eq!(clamped.size(), Pagination::MAX_SIZE);
        assert_eq!(clamped.offset(), 200);
    }

    #[test]
    fn test_pagination_totals() {
        let pagination = Pagination::new(Some(2), Some(10));
        assert_eq!(pagination.total_pages(0), 0);
        assert_eq!(pagination.total_pages(25), 3);
        assert!(pagination.has_more(25));
        assert!(!pagination.has_more(20));
    }

    #[test]
    fn test_replace_bumps_version_and_keeps_identity() {
        let created_at = Utc::now();
        let product = Product::new(ProductId::from("p1"), ProductDraft::named("A"), created_at);
        assert_eq!(product.version, 1);

        let later = created_at + chrono::Duration::seconds(5);
        let replaced = product.replaced_with(ProductDraft::named("B"), later);

        assert_eq!(replaced.id, product.id);
        assert_eq!(replaced.name, "B");
        assert_eq!(replaced.version, 2);
        assert_eq!(replaced.created_at, created_at);
        assert_eq!(replaced.updated_at, later);
    }

    #[test]
    fn test_matches_all_tokens_case_insensitively() {
        let product = Product::new(
            ProductId::from("p1"),
            ProductDraft {
                id: None,
                name: "Espresso Machine".to_string(),
                category: "kitchen".to_string(),
                description: "Stainless steel, 15 bar".to_string(),
                price: 199.0,
            },
            Utc::now(),
        );

        assert!(product.matches(&search_tokens("")));
        assert!(product.matches(&search_tokens("espresso")));
        assert!(product.matches(&search_tokens("KITCHEN steel")));
        assert!(!product.matches(&search_tokens("espresso grinder")));
    }
}
