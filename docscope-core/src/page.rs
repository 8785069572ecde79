//! Pagination and page result types for document listings.
//!
//! [`Pagination`] turns a 1-based page number and a page size into skip/limit values, and
//! [`DocumentPage`] carries one page of listed documents together with the total count and
//! navigation metadata.

use bson::Document;
use serde::{Deserialize, Serialize};

/// A single page of listed documents.
///
/// # Example
///
/// ```ignore
/// use docscope::page::DocumentPage;
///
/// let page = DocumentPage::builder(vec![])
///     .with_total_count(100)
///     .with_pagination(2, 20)
///     .build();
///
/// assert_eq!(page.next_page, Some(3));
/// assert_eq!(page.previous_page, Some(1));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPage {
    /// The documents of this page, each annotated with its display index.
    pub docs: Vec<Document>,
    /// Number of documents matching the selector across all pages.
    pub total_count: u64,
    /// The page number (1-based).
    pub page: u64,
    /// The page size used to compute default skip/limit.
    pub per_page: u64,
    /// The next page number, if more documents follow.
    pub next_page: Option<u64>,
    /// The previous page number, if this is not the first page.
    pub previous_page: Option<u64>,
}

impl DocumentPage {
    pub fn builder(docs: Vec<Document>) -> DocumentPageBuilder {
        DocumentPageBuilder::new(docs)
    }
}

impl Default for DocumentPage {
    fn default() -> Self {
        Self {
            docs: Vec::new(),
            total_count: 0,
            page: 1,
            per_page: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for [`DocumentPage`].
pub struct DocumentPageBuilder {
    docs: Vec<Document>,
    total_count: u64,
    page: u64,
    per_page: u64,
    skip: Option<u64>,
}

impl DocumentPageBuilder {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            docs,
            total_count: 0,
            page: 1,
            per_page: 0,
            skip: None,
        }
    }

    /// Sets the total count of matching documents.
    pub fn with_total_count(mut self, total_count: u64) -> Self {
        self.total_count = total_count;
        self
    }

    /// Sets the page number and size.
    pub fn with_pagination(mut self, page: u64, per_page: u64) -> Self {
        self.page = page.max(1);
        self.per_page = per_page;
        self
    }

    /// Sets the number of documents skipped before this page, when it differs from the
    /// page-derived offset.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn build(self) -> DocumentPage {
        let skip = self
            .skip
            .unwrap_or_else(|| Pagination::new(self.page, self.per_page).skip());
        let seen = skip.saturating_add(self.docs.len() as u64);

        DocumentPage {
            next_page: (!self.docs.is_empty() && seen < self.total_count).then_some(self.page + 1),
            previous_page: (self.page > 1).then(|| self.page - 1),
            docs: self.docs,
            total_count: self.total_count,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// A 1-based page number and a page size.
///
/// # Example
///
/// ```ignore
/// use docscope::page::Pagination;
///
/// let params = Pagination::new(3, 20);
/// assert_eq!(params.skip(), 40);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Pagination {
    /// Creates pagination parameters. Page numbers below 1 are treated as 1.
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page: page.max(1),
            per_page,
        }
    }

    /// Number of documents to skip to reach this page.
    pub fn skip(&self) -> u64 {
        (self.page - 1)
            .saturating_mul(self.per_page)
            .min(i64::MAX as u64)
    }

    /// Number of documents on a full page.
    pub fn limit(&self) -> u64 {
        self.per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 20 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn computes_skip() {
        assert_eq!(Pagination::new(1, 20).skip(), 0);
        assert_eq!(Pagination::new(3, 20).skip(), 40);
        assert_eq!(Pagination::new(0, 20).skip(), 0);
        assert_eq!(Pagination::new(u64::MAX, 20).skip(), i64::MAX as u64);
    }

    #[test]
    fn builds_navigation() {
        let page = DocumentPage::builder(vec![doc! {}, doc! {}])
            .with_total_count(5)
            .with_pagination(2, 2)
            .build();

        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));

        let last = DocumentPage::builder(vec![doc! {}])
            .with_total_count(5)
            .with_pagination(3, 2)
            .build();

        assert_eq!(last.next_page, None);
        assert_eq!(last.previous_page, Some(2));
    }

    #[test]
    fn honours_explicit_skip() {
        let page = DocumentPage::builder(vec![doc! {}])
            .with_total_count(10)
            .with_pagination(1, 5)
            .with_skip(9)
            .build();

        assert_eq!(page.next_page, None);

        let far = DocumentPage::builder(vec![doc! {}])
            .with_total_count(10)
            .with_pagination(1, 5)
            .with_skip(u64::MAX)
            .build();

        assert_eq!(far.next_page, None);
    }
}
